//! Error taxonomy for the streaming pipeline.
//!
//! Only conditions that are fatal to a session or visible at the API
//! boundary are typed here. Transient I/O failures (a muxer stdin or FIFO
//! write going bad) are logged and the frame dropped; viewer transport
//! errors stay confined to their connection; teardown failures are logged
//! and swallowed. None of those ever propagate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The external muxing process could not be launched. Fatal to the
    /// session; propagated to the session starter.
    #[error("muxer process spawn failed: {0}")]
    MuxerSpawn(#[source] std::io::Error),

    /// The external decoder process could not be launched. Fatal to the
    /// session.
    #[error("decoder process spawn failed: {0}")]
    DecoderSpawn(#[source] std::io::Error),

    /// The audio FIFO could not be created or replaced.
    #[error("audio channel setup failed: {0}")]
    AudioChannel(#[source] std::io::Error),

    #[error("session {0} already exists")]
    SessionExists(String),

    #[error("session {0} not found")]
    SessionNotFound(String),
}
