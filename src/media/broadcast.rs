use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;
use tokio_util::sync::CancellationToken;

/// Content type of the MJPEG stream; each chunk is framed by the literal
/// `frame` boundary.
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Pacing interval for viewer loops, capping throughput near 30 fps.
pub const VIEWER_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Single-slot, last-write-wins store for the most recent JPEG. One writer
/// (the decode path), any number of viewer readers. The lock is held only
/// for the pointer swap/clone, so a reader always sees either the previous
/// frame or the current one, never a torn buffer.
#[derive(Default)]
pub struct LatestFrameCache {
    slot: Mutex<Option<Bytes>>,
}

impl LatestFrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached frame.
    pub fn store(&self, frame: Bytes) {
        *self.slot.lock().unwrap() = Some(frame);
    }

    /// Cheap handle to the current frame, if any frame has been decoded yet.
    pub fn latest(&self) -> Option<Bytes> {
        self.slot.lock().unwrap().clone()
    }
}

/// Wrap one JPEG as a multipart chunk:
/// `--frame\r\nContent-Type: image/jpeg\r\n\r\n<jpeg>\r\n`.
pub fn mjpeg_chunk(frame: &Bytes) -> Bytes {
    let mut buf = BytesMut::with_capacity(frame.len() + 64);
    buf.put_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    buf.put_slice(frame);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Chunk stream for one viewer connection. Polls the cache every
/// [`VIEWER_FRAME_INTERVAL`]; ends when the session is cancelled, and is
/// simply dropped when the client disconnects. One viewer's lifecycle
/// never touches the cache writer or other viewers.
pub fn viewer_stream(
    cache: Arc<LatestFrameCache>,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    futures::stream::unfold((cache, cancel), |(cache, cancel)| async move {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(VIEWER_FRAME_INTERVAL) => {}
            }
            // Nothing decoded yet: keep pacing without emitting a chunk
            if let Some(frame) = cache.latest() {
                let chunk = mjpeg_chunk(&frame);
                return Some((Ok(chunk), (cache, cancel)));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_store_and_latest() {
        let cache = LatestFrameCache::new();
        assert!(cache.latest().is_none());

        cache.store(Bytes::from_static(b"one"));
        assert_eq!(cache.latest().unwrap(), Bytes::from_static(b"one"));

        cache.store(Bytes::from_static(b"two"));
        assert_eq!(cache.latest().unwrap(), Bytes::from_static(b"two"));
    }

    #[test]
    fn test_mjpeg_chunk_framing() {
        let chunk = mjpeg_chunk(&Bytes::from_static(b"JPEGDATA"));
        assert_eq!(
            chunk.as_ref(),
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEGDATA\r\n"
        );
    }

    #[tokio::test]
    async fn test_readers_never_observe_torn_frames() {
        let cache = Arc::new(LatestFrameCache::new());

        let frame_a = Bytes::from(vec![0xAA; 4096]);
        let frame_b = Bytes::from(vec![0xBB; 4096]);

        let writer = {
            let cache = Arc::clone(&cache);
            let (a, b) = (frame_a.clone(), frame_b.clone());
            tokio::spawn(async move {
                for i in 0..500 {
                    cache.store(if i % 2 == 0 { a.clone() } else { b.clone() });
                    tokio::task::yield_now().await;
                }
            })
        };

        let reader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                for _ in 0..500 {
                    if let Some(frame) = cache.latest() {
                        // Every observed frame is one of the two writes in full
                        assert!(frame == frame_a || frame == frame_b);
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        writer.await.unwrap();
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_viewer_stream_yields_cached_frames() {
        let cache = Arc::new(LatestFrameCache::new());
        cache.store(Bytes::from_static(b"JPEG"));

        let cancel = CancellationToken::new();
        let mut stream = Box::pin(viewer_stream(Arc::clone(&cache), cancel.clone()));

        let chunk = stream.next().await.unwrap().unwrap();
        assert!(chunk.starts_with(b"--frame\r\n"));
        assert!(chunk.ends_with(b"JPEG\r\n"));

        cancel.cancel();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_viewer_disconnect_leaves_other_viewers_alone() {
        let cache = Arc::new(LatestFrameCache::new());
        cache.store(Bytes::from_static(b"JPEG"));
        let cancel = CancellationToken::new();

        let mut first = Box::pin(viewer_stream(Arc::clone(&cache), cancel.clone()));
        let mut second = Box::pin(viewer_stream(Arc::clone(&cache), cancel.clone()));

        assert!(first.next().await.is_some());
        assert!(second.next().await.is_some());

        // One client going away just drops its stream
        drop(first);

        let chunk = second.next().await.unwrap().unwrap();
        assert!(chunk.ends_with(b"JPEG\r\n"));
    }

    #[tokio::test]
    async fn test_viewer_stream_waits_while_cache_empty() {
        let cache = Arc::new(LatestFrameCache::new());
        let cancel = CancellationToken::new();
        let mut stream = Box::pin(viewer_stream(Arc::clone(&cache), cancel.clone()));

        // No frame cached: nothing must be emitted within a few intervals
        let nothing =
            tokio::time::timeout(VIEWER_FRAME_INTERVAL * 3, stream.next()).await;
        assert!(nothing.is_err());

        cache.store(Bytes::from_static(b"LATE"));
        let chunk = tokio::time::timeout(VIEWER_FRAME_INTERVAL * 3, stream.next())
            .await
            .expect("frame after store")
            .unwrap()
            .unwrap();
        assert!(chunk.ends_with(b"LATE\r\n"));
    }
}
