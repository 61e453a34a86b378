use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config;
use crate::error::Error;
use crate::media::audio::AudioChannel;
use crate::media::broadcast::LatestFrameCache;
use crate::media::decode::{DecodePipeline, FramePostprocess};
use crate::media::gate::{GateDecision, Phase, PrimingGate};
use crate::media::muxer::MuxerProcess;
use crate::media::types::{Codec, Frame, FrameKind, SessionConfig, SinkKind, StartOptions};
use crate::source::{frame_queue, FrameSource};

/// Point-in-time view of a session, for the status endpoint.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SessionStatus {
    pub phase: Phase,
    pub codec: Codec,
    pub frame_count: u64,
    pub dropped_count: u64,
    pub error: Option<String>,
}

/// One streaming session: owns the gate, the chosen sink, the optional
/// audio side-channel and the cancellation token. All pipeline state is
/// mutated only by the frame-consuming task inside [`StreamSession::start`];
/// concurrent sessions never share state.
pub struct StreamSession {
    id: String,
    config: SessionConfig,
    source: Box<dyn FrameSource>,
    cancel: CancellationToken,
    started: AtomicBool,
    status: Mutex<SessionStatus>,
    cache: Option<Arc<LatestFrameCache>>,
    postprocess: Option<Arc<dyn FramePostprocess>>,
}

impl StreamSession {
    pub fn new(id: impl Into<String>, config: SessionConfig, source: Box<dyn FrameSource>) -> Self {
        let cache = match config.sink {
            SinkKind::Mjpeg => Some(Arc::new(LatestFrameCache::new())),
            SinkKind::Rtsp { .. } => None,
        };
        Self {
            id: id.into(),
            config,
            source,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            status: Mutex::new(SessionStatus::default()),
            cache,
            postprocess: None,
        }
    }

    /// Install a decode post-processor (broadcast sessions only). Must be
    /// set before the session starts.
    #[allow(dead_code)]
    pub fn with_postprocess(mut self, postprocess: Arc<dyn FramePostprocess>) -> Self {
        self.postprocess = Some(postprocess);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check if the session pipeline is running
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    /// Check if the session has been cancelled
    #[allow(dead_code)]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.lock().unwrap().clone()
    }

    /// Latest-frame cache of a broadcast session; None for RTSP sinks.
    pub fn frame_cache(&self) -> Option<Arc<LatestFrameCache>> {
        self.cache.clone()
    }

    /// Token for viewer loops: cancelled together with the session.
    pub fn viewer_cancel(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Start the session pipeline
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::Relaxed) {
            log::warn!("session {}: already started", self.id);
            return;
        }

        let (sink, mut queue) = frame_queue(config::config().frame_queue_capacity());
        self.source.register(sink);
        let opts = StartOptions {
            quality: self.config.quality,
            enable_audio: self.config.enable_audio,
            enable_reconnect: self.config.enable_reconnect,
        };
        if let Err(e) = self.source.start(opts) {
            log::error!("session {}: source start failed: {:#}", self.id, e);
            self.record_error(format!("{e:#}"));
            self.status.lock().unwrap().phase = Phase::Stopped;
            self.started.store(false, Ordering::Relaxed);
            return;
        }

        log::info!(
            "session {}: consuming frames from {} (channel {})",
            self.id,
            self.config.device_id,
            self.config.channel
        );

        let mut pipeline = Pipeline::new(self);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    log::info!("session {}: cancelled", self.id);
                    break;
                }
                frame = queue.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = pipeline.process(frame).await {
                            log::error!("session {}: fatal: {}", self.id, e);
                            self.record_error(e.to_string());
                            break;
                        }
                        self.sync_status(&pipeline.gate);
                    }
                    None => {
                        log::info!("session {}: frame queue closed", self.id);
                        break;
                    }
                }
            }
        }

        // Ordered teardown: cancel viewers and pending waits, stop the
        // device stream, close the audio side-channel, terminate the
        // external process. Each step is guarded so a failure in one never
        // blocks the next.
        self.cancel.cancel();
        self.source.stop();
        pipeline.teardown().await;
        self.sync_status(&pipeline.gate);
        self.status.lock().unwrap().phase = Phase::Stopped;
        self.started.store(false, Ordering::Relaxed);
        log::info!("session {}: stopped", self.id);
    }

    fn sync_status(&self, gate: &PrimingGate) {
        let mut status = self.status.lock().unwrap();
        status.phase = gate.phase();
        status.codec = gate.codec();
        status.frame_count = gate.frame_count();
        status.dropped_count = gate.dropped_count();
    }

    fn record_error(&self, message: String) {
        self.status.lock().unwrap().error = Some(message);
    }

    fn audio_fifo_path(&self) -> PathBuf {
        self.config.audio_fifo.clone().unwrap_or_else(|| {
            config::config()
                .fifo_dir()
                .join(format!("{}_audio.fifo", self.id))
        })
    }
}

enum SinkState {
    Rtsp {
        url: String,
        muxer: Option<MuxerProcess>,
    },
    Mjpeg {
        cache: Arc<LatestFrameCache>,
        decoder: Option<DecodePipeline>,
    },
}

/// Mutable pipeline state, local to the frame-consuming task.
struct Pipeline<'a> {
    session: &'a StreamSession,
    gate: PrimingGate,
    sink: SinkState,
    audio: Option<AudioChannel>,
}

impl<'a> Pipeline<'a> {
    fn new(session: &'a StreamSession) -> Self {
        let sink = match &session.config.sink {
            SinkKind::Rtsp { url } => SinkState::Rtsp {
                url: url.clone(),
                muxer: None,
            },
            SinkKind::Mjpeg => SinkState::Mjpeg {
                cache: session
                    .cache
                    .clone()
                    .expect("broadcast session always has a cache"),
                decoder: None,
            },
        };
        Self {
            session,
            gate: PrimingGate::new(),
            sink,
            audio: None,
        }
    }

    async fn process(&mut self, frame: Frame) -> Result<(), Error> {
        match frame.kind {
            FrameKind::RawVideo => match self.gate.offer(&frame.payload) {
                GateDecision::Dropped | GateDecision::Rejected => Ok(()),
                GateDecision::Primed(codec) => {
                    self.prime(codec).await?;
                    self.write_video(&frame.payload).await;
                    Ok(())
                }
                GateDecision::Forward => {
                    self.write_video(&frame.payload).await;
                    Ok(())
                }
            },
            FrameKind::DecodedPcm => {
                if let Some(audio) = self.audio.as_mut() {
                    audio.write_pcm(&frame.payload).await;
                }
                Ok(())
            }
            FrameKind::DecodedImage => {
                // Device-side decoded JPEGs go straight into the broadcast
                // slot, no decoder process involved.
                if let SinkState::Mjpeg { cache, .. } = &self.sink {
                    cache.store(frame.payload);
                }
                Ok(())
            }
            FrameKind::RawAudio => {
                // The muxer's audio leg consumes PCM from the FIFO; the
                // encoded audio elementary stream has no consumer here.
                log::trace!("session {}: raw audio frame ignored", self.session.id);
                Ok(())
            }
        }
    }

    /// First qualifying frame arrived: bring up the sink for `codec`.
    /// The FIFO must exist and its open task must be underway before the
    /// muxer spawns, since the muxer is the reader that completes the open.
    async fn prime(&mut self, codec: Codec) -> Result<(), Error> {
        match &mut self.sink {
            SinkState::Rtsp { url, muxer } => {
                let fifo = if self.session.config.enable_audio {
                    let channel = AudioChannel::create(self.session.audio_fifo_path())?;
                    channel.connect(self.session.cancel.child_token());
                    let path = channel.path().to_path_buf();
                    self.audio = Some(channel);
                    Some(path)
                } else {
                    None
                };
                let started = MuxerProcess::start(
                    self.session.config.ffmpeg_bin(),
                    codec,
                    url,
                    fifo.as_deref(),
                )?;
                *muxer = Some(started);
            }
            SinkState::Mjpeg { cache, decoder } => {
                let cfg = config::config();
                let started = DecodePipeline::start(
                    self.session.config.ffmpeg_bin(),
                    codec,
                    cfg.decode_width(),
                    cfg.decode_height(),
                    cfg.jpeg_quality(),
                    Arc::clone(cache),
                    self.session.postprocess.clone(),
                    self.session.cancel.child_token(),
                )?;
                *decoder = Some(started);
            }
        }
        Ok(())
    }

    async fn write_video(&mut self, data: &[u8]) {
        match &mut self.sink {
            SinkState::Rtsp {
                muxer: Some(muxer), ..
            } => muxer.write_video(data).await,
            SinkState::Mjpeg {
                decoder: Some(decoder),
                ..
            } => decoder.write_video(data).await,
            _ => {}
        }
    }

    async fn teardown(&mut self) {
        self.gate.stop();
        if let Some(mut audio) = self.audio.take() {
            audio.close().await;
        }
        match &mut self.sink {
            SinkState::Rtsp { muxer, .. } => {
                if let Some(mut muxer) = muxer.take() {
                    muxer.stop().await;
                }
            }
            SinkState::Mjpeg { decoder, .. } => {
                if let Some(mut decoder) = decoder.take() {
                    decoder.stop().await;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
