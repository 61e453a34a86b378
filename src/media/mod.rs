//! Live media pipeline: keyframe priming, remux push and MJPEG broadcast.
//!
//! Data flow:
//! ```text
//! Frame Source ─► bounded queue ─► Priming Gate ──┬─► Muxer process ─► RTSP push
//!                                                 │        ▲
//!                                                 │   PCM FIFO (audio side-channel)
//!                                                 │
//!                                                 └─► Decoder process ─► postprocess?
//!                                                       ─► JPEG ─► LatestFrameCache ─► viewers
//! ```
//!
//! The two sink paths are mutually exclusive per session and share the
//! source/gate front end. Everything is loss-tolerant by design: frames
//! that cannot be delivered right now are dropped, never buffered or
//! retried.

pub mod audio;
pub mod bitstream;
pub mod broadcast;
pub mod decode;
pub mod gate;
pub mod muxer;
pub mod session;
pub mod types;
