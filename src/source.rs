//! Device frame source abstraction.
//!
//! The concrete camera SDK (cloud auth, device transport, reconnects) is
//! an external collaborator. The pipeline only sees a capability
//! interface: register a sink, start, stop. [`CallbackSource`] is the one
//! concrete adapter, mapping the SDK's callback push model onto a bounded
//! channel so the drop-on-backpressure policy is explicit instead of
//! hidden in swallowed send errors.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::media::types::{Frame, StartOptions};

/// Cadence of the queue-overflow diagnostic.
const OVERFLOW_LOG_EVERY: u64 = 50;

/// Producer half of the bounded frame queue. Frames pushed into a full
/// queue are dropped and counted; the pipeline is latency-optimized and
/// loss-tolerant, so nobody ever blocks here.
#[derive(Clone)]
pub struct FrameSink {
    writer: mpsc::Sender<Frame>,
    overflow: Arc<AtomicU64>,
}

impl FrameSink {
    pub fn push(&self, frame: Frame) {
        match self.writer.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(frame)) => {
                let n = self.overflow.fetch_add(1, Ordering::Relaxed) + 1;
                if n % OVERFLOW_LOG_EVERY == 0 {
                    log::warn!("source: frame queue full, {} frames dropped ({})", n, frame);
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Consumer half, owned by the session's frame-processing task.
pub struct FrameQueue {
    inner: mpsc::Receiver<Frame>,
    overflow: Arc<AtomicU64>,
}

impl FrameQueue {
    pub async fn recv(&mut self) -> Option<Frame> {
        self.inner.recv().await
    }

    /// Frames dropped at the queue boundary (backpressure), distinct from
    /// frames dropped by the priming gate.
    pub fn overflow(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }
}

/// Create a bounded queue pair.
pub fn frame_queue(capacity: usize) -> (FrameSink, FrameQueue) {
    let (writer, receiver) = mpsc::channel(capacity);
    let overflow = Arc::new(AtomicU64::new(0));
    (
        FrameSink {
            writer,
            overflow: Arc::clone(&overflow),
        },
        FrameQueue {
            inner: receiver,
            overflow,
        },
    )
}

/// Capability interface for a camera device stream.
pub trait FrameSource: Send + Sync {
    /// Register the sink that receives delivered frames. Called once
    /// before `start`.
    fn register(&self, sink: FrameSink);

    /// Begin delivering frames with the given options.
    fn start(&self, opts: StartOptions) -> anyhow::Result<()>;

    /// Stop delivering frames. Idempotent; must not fail.
    fn stop(&self);
}

struct SourceShared {
    sink: Mutex<Option<FrameSink>>,
    running: AtomicBool,
}

/// Adapter for callback-push device SDKs. The SDK integration holds a
/// [`SourceHandle`] and invokes the callback methods as media arrives;
/// callback kinds the integration never wires up are simply never invoked.
pub struct CallbackSource {
    shared: Arc<SourceShared>,
}

impl CallbackSource {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SourceShared {
                sink: Mutex::new(None),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Handle for the SDK side. Clones share the same source.
    pub fn handle(&self) -> SourceHandle {
        SourceHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for CallbackSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for CallbackSource {
    fn register(&self, sink: FrameSink) {
        *self.shared.sink.lock().unwrap() = Some(sink);
    }

    fn start(&self, opts: StartOptions) -> anyhow::Result<()> {
        self.shared.running.store(true, Ordering::Release);
        log::info!(
            "source: started (quality={:?}, audio={}, reconnect={})",
            opts.quality,
            opts.enable_audio,
            opts.enable_reconnect
        );
        Ok(())
    }

    fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        log::info!("source: stopped");
    }
}

/// Callback surface invoked by the device SDK. Frames delivered while the
/// source is not running are discarded.
#[derive(Clone)]
pub struct SourceHandle {
    shared: Arc<SourceShared>,
}

impl SourceHandle {
    pub fn on_raw_video(
        &self,
        did: &str,
        payload: Bytes,
        timestamp: i64,
        sequence: u32,
        channel: u32,
    ) {
        self.push(did, Frame::raw_video(payload, timestamp, sequence, channel));
    }

    pub fn on_decoded_image(&self, did: &str, payload: Bytes, timestamp: i64, channel: u32) {
        self.push(did, Frame::decoded_image(payload, timestamp, channel));
    }

    pub fn on_raw_audio(
        &self,
        did: &str,
        payload: Bytes,
        timestamp: i64,
        sequence: u32,
        channel: u32,
    ) {
        self.push(did, Frame::raw_audio(payload, timestamp, sequence, channel));
    }

    pub fn on_decoded_pcm(&self, did: &str, payload: Bytes, timestamp: i64, channel: u32) {
        self.push(did, Frame::decoded_pcm(payload, timestamp, channel));
    }

    fn push(&self, did: &str, frame: Frame) {
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }
        log::trace!("source {}: {}", did, frame);
        let guard = self.shared.sink.lock().unwrap();
        if let Some(sink) = guard.as_ref() {
            sink.push(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::types::FrameKind;

    #[tokio::test]
    async fn test_queue_drops_on_overflow() {
        let (sink, mut queue) = frame_queue(2);

        for seq in 0..5u32 {
            sink.push(Frame::raw_video(Bytes::from_static(b"x"), 0, seq, 0));
        }
        assert_eq!(queue.overflow(), 3);

        // The two oldest accepted frames are still delivered in order
        assert_eq!(queue.recv().await.unwrap().sequence, Some(0));
        assert_eq!(queue.recv().await.unwrap().sequence, Some(1));
    }

    #[tokio::test]
    async fn test_callback_source_delivers_only_when_running() {
        let source = CallbackSource::new();
        let (sink, mut queue) = frame_queue(8);
        source.register(sink);
        let handle = source.handle();

        // Not started yet: discarded
        handle.on_raw_video("did1", Bytes::from_static(b"a"), 1, 1, 0);

        source.start(StartOptions::default()).unwrap();
        handle.on_raw_video("did1", Bytes::from_static(b"b"), 2, 2, 0);
        handle.on_decoded_pcm("did1", Bytes::from_static(b"pcm"), 3, 0);

        source.stop();
        handle.on_raw_video("did1", Bytes::from_static(b"c"), 4, 3, 0);

        let first = queue.recv().await.unwrap();
        assert_eq!(first.kind, FrameKind::RawVideo);
        assert_eq!(first.sequence, Some(2));

        let second = queue.recv().await.unwrap();
        assert_eq!(second.kind, FrameKind::DecodedPcm);
        assert_eq!(second.sequence, None);
    }
}
