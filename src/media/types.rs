use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config;

/// Video codec detected from the raw bitstream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Unknown,
    H264,
    Hevc,
}

impl Codec {
    /// Name of the raw-bitstream demuxer the external process uses for
    /// this codec (`-f <name>`).
    pub fn demuxer_name(&self) -> Option<&'static str> {
        match self {
            Codec::H264 => Some("h264"),
            Codec::Hevc => Some("hevc"),
            Codec::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Codec::Unknown)
    }
}

impl Display for Codec {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Codec::Unknown => write!(f, "unknown"),
            Codec::H264 => write!(f, "h264"),
            Codec::Hevc => write!(f, "hevc"),
        }
    }
}

/// Stream quality requested from the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    #[default]
    Low,
    High,
}

/// What kind of payload a frame carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    RawVideo,
    RawAudio,
    DecodedImage,
    DecodedPcm,
}

/// A single unit of media handed through the pipeline. Immutable once
/// produced; the `Bytes` payload makes clones cheap.
#[derive(Clone, Debug)]
pub struct Frame {
    pub payload: Bytes,
    pub timestamp: i64,
    pub sequence: Option<u32>,
    pub channel: u32,
    pub kind: FrameKind,
}

impl Frame {
    pub fn raw_video(payload: Bytes, timestamp: i64, sequence: u32, channel: u32) -> Self {
        Self {
            payload,
            timestamp,
            sequence: Some(sequence),
            channel,
            kind: FrameKind::RawVideo,
        }
    }

    pub fn raw_audio(payload: Bytes, timestamp: i64, sequence: u32, channel: u32) -> Self {
        Self {
            payload,
            timestamp,
            sequence: Some(sequence),
            channel,
            kind: FrameKind::RawAudio,
        }
    }

    pub fn decoded_image(payload: Bytes, timestamp: i64, channel: u32) -> Self {
        Self {
            payload,
            timestamp,
            sequence: None,
            channel,
            kind: FrameKind::DecodedImage,
        }
    }

    pub fn decoded_pcm(payload: Bytes, timestamp: i64, channel: u32) -> Self {
        Self {
            payload,
            timestamp,
            sequence: None,
            channel,
            kind: FrameKind::DecodedPcm,
        }
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "Frame {{ kind: {:?}, len: {} }}",
            self.kind,
            self.payload.len()
        )
    }
}

/// Options handed to the device source when a session starts.
#[derive(Clone, Copy, Debug, Default)]
pub struct StartOptions {
    pub quality: QualityTier,
    pub enable_audio: bool,
    pub enable_reconnect: bool,
}

/// Where the gated video goes once the session is primed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkKind {
    /// Codec-copy remux into an RTSP push target.
    Rtsp { url: String },
    /// Decode and re-publish as an MJPEG broadcast to HTTP viewers.
    Mjpeg,
}

/// Per-session configuration.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub device_id: String,
    pub channel: u32,
    pub sink: SinkKind,
    pub quality: QualityTier,
    pub enable_audio: bool,
    pub enable_reconnect: bool,
    /// Explicit FIFO path for the audio side-channel. None = derived from
    /// the configured FIFO directory and the session id.
    pub audio_fifo: Option<PathBuf>,
    /// Muxer/decoder binary. None = the configured default.
    pub ffmpeg_bin: Option<String>,
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    pub fn ffmpeg_bin(&self) -> &str {
        self.ffmpeg_bin
            .as_deref()
            .unwrap_or_else(|| config::config().ffmpeg_bin())
    }
}

#[derive(Default)]
pub struct SessionConfigBuilder {
    device_id: Option<String>,
    channel: u32,
    sink: Option<SinkKind>,
    quality: QualityTier,
    enable_audio: bool,
    enable_reconnect: bool,
    audio_fifo: Option<PathBuf>,
    ffmpeg_bin: Option<String>,
}

#[allow(dead_code)]
impl SessionConfigBuilder {
    pub fn device_id(mut self, did: impl Into<String>) -> Self {
        self.device_id = Some(did.into());
        self
    }

    pub fn channel(mut self, channel: u32) -> Self {
        self.channel = channel;
        self
    }

    pub fn sink(mut self, sink: SinkKind) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Push the gated bitstream into an RTSP target (codec copy)
    pub fn rtsp_sink(mut self, url: impl Into<String>) -> Self {
        self.sink = Some(SinkKind::Rtsp { url: url.into() });
        self
    }

    /// Decode and broadcast as MJPEG over HTTP
    pub fn mjpeg_sink(mut self) -> Self {
        self.sink = Some(SinkKind::Mjpeg);
        self
    }

    pub fn quality(mut self, quality: QualityTier) -> Self {
        self.quality = quality;
        self
    }

    pub fn enable_audio(mut self, enable: bool) -> Self {
        self.enable_audio = enable;
        self
    }

    pub fn enable_reconnect(mut self, enable: bool) -> Self {
        self.enable_reconnect = enable;
        self
    }

    pub fn audio_fifo(mut self, path: impl Into<PathBuf>) -> Self {
        self.audio_fifo = Some(path.into());
        self
    }

    pub fn ffmpeg_bin(mut self, bin: impl Into<String>) -> Self {
        self.ffmpeg_bin = Some(bin.into());
        self
    }

    pub fn build(self) -> SessionConfig {
        SessionConfig {
            device_id: self.device_id.expect("device_id is required"),
            channel: self.channel,
            sink: self.sink.expect("sink is required"),
            quality: self.quality,
            enable_audio: self.enable_audio,
            enable_reconnect: self.enable_reconnect,
            audio_fifo: self.audio_fifo,
            ffmpeg_bin: self.ffmpeg_bin,
        }
    }
}
