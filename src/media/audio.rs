use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Diagnostic cadence once PCM is flowing.
const AUDIO_LOG_EVERY: u64 = 200;

/// PCM side-channel into the muxer: a named FIFO whose write end only
/// opens once the muxer attaches its reader. PCM arriving before that is
/// dropped, not buffered.
pub struct AudioChannel {
    path: PathBuf,
    /// Filled by the open task, claimed once by the writing side.
    pending: Arc<Mutex<Option<std::fs::File>>>,
    ready: Arc<AtomicBool>,
    writer: Option<tokio::fs::File>,
    frame_count: u64,
}

impl AudioChannel {
    /// Create the FIFO on the filesystem, removing any stale instance
    /// first. Must happen before the muxer process is spawned.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        match std::fs::remove_file(&path) {
            Ok(()) => log::debug!("audio: removed stale fifo {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::AudioChannel(e)),
        }

        nix::unistd::mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP)
            .map_err(|e| Error::AudioChannel(std::io::Error::from(e)))?;
        log::debug!("audio: created fifo {}", path.display());

        Ok(Self {
            path,
            pending: Arc::new(Mutex::new(None)),
            ready: Arc::new(AtomicBool::new(false)),
            writer: None,
            frame_count: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[allow(dead_code)]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Open the write end off the frame-callback path. The open call
    /// blocks until the muxer attaches its reader, so it runs on the
    /// blocking pool; the readiness flag flips exactly once when it
    /// completes.
    pub fn connect(&self, cancel: CancellationToken) {
        let path = self.path.clone();
        let pending = Arc::clone(&self.pending);
        let ready = Arc::clone(&self.ready);

        tokio::spawn(async move {
            let open = tokio::task::spawn_blocking(move || {
                std::fs::OpenOptions::new().write(true).open(&path)
            });
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("audio: pipe open abandoned on cancellation");
                }
                res = open => match res {
                    Ok(Ok(file)) => {
                        *pending.lock().unwrap() = Some(file);
                        ready.store(true, Ordering::Release);
                        log::info!("audio: pipe connected");
                    }
                    Ok(Err(e)) => log::warn!("audio: pipe open failed: {}", e),
                    Err(e) => log::warn!("audio: pipe open task failed: {}", e),
                }
            }
        });
    }

    /// Write one frame of raw little-endian 16-bit mono PCM. Silently
    /// dropped until the pipe is ready; a broken pipe is swallowed since
    /// the reader side can exit independently of the video path.
    pub async fn write_pcm(&mut self, data: &[u8]) {
        if self.writer.is_none() {
            if !self.ready.load(Ordering::Acquire) {
                return;
            }
            let Some(file) = self.pending.lock().unwrap().take() else {
                return;
            };
            self.writer = Some(tokio::fs::File::from_std(file));
        }

        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        match writer.write_all(data).await {
            Ok(()) => {
                self.frame_count += 1;
                if self.frame_count % AUDIO_LOG_EVERY == 0 {
                    log::debug!("audio: {} pcm frames written", self.frame_count);
                }
            }
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
            Err(e) => log::warn!("audio: pcm write failed: {}", e),
        }
    }

    /// Drop the write half and unlink the FIFO. Best-effort; never
    /// propagates.
    pub async fn close(&mut self) {
        self.ready.store(false, Ordering::Release);
        self.pending.lock().unwrap().take();
        if let Some(writer) = self.writer.take() {
            drop(writer);
        }
        // A write-end open may still be parked waiting for a reader that
        // will never come; attaching a transient non-blocking read end
        // releases it so its thread can exit.
        if let Ok(fd) = nix::fcntl::open(
            &self.path,
            OFlag::O_RDONLY | OFlag::O_NONBLOCK,
            Mode::empty(),
        ) {
            let _ = nix::unistd::close(fd);
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("audio: removed fifo {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log::warn!("audio: fifo removal failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_before_ready_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("audio.fifo");
        let mut channel = AudioChannel::create(&fifo).unwrap();

        assert!(!channel.is_ready());
        // No reader was ever attached: the write must be a silent no-op
        channel.write_pcm(&[0u8; 640]).await;
        assert!(!channel.is_ready());

        channel.close().await;
    }

    #[tokio::test]
    async fn test_create_replaces_stale_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("audio.fifo");
        std::fs::write(&fifo, b"stale").unwrap();

        let mut channel = AudioChannel::create(&fifo).unwrap();
        assert!(fifo.exists());
        // The stale regular file was replaced by an actual FIFO
        let meta = std::fs::metadata(&fifo).unwrap();
        use std::os::unix::fs::FileTypeExt;
        assert!(meta.file_type().is_fifo());

        channel.close().await;
        assert!(!fifo.exists());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("audio.fifo");
        let mut channel = AudioChannel::create(&fifo).unwrap();

        channel.close().await;
        assert!(!fifo.exists());
        // Second close finds nothing to remove and must not error
        channel.close().await;
    }
}
