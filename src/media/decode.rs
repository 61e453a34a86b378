use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use jpeg_encoder::{ColorType, Encoder};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::media::broadcast::LatestFrameCache;
use crate::media::types::Codec;

/// Grace period between closing stdin and force-killing the decoder.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// A decoded BGR24 image, tightly packed (`width * height * 3` bytes).
pub struct BgrImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Pluggable hook between decode and JPEG re-encode, e.g. an
/// object-detection overlay. Mutates the image in place.
pub trait FramePostprocess: Send + Sync {
    fn process(&self, image: &mut BgrImage);
}

/// Argument list for the raw-bitstream decoder: encoded frames in on
/// stdin, fixed-size BGR24 frames out on stdout. The scale filter pins the
/// output dimensions so the reader can frame stdout by size alone.
pub(crate) fn decode_args(codec: Codec, width: u32, height: u32) -> Vec<String> {
    let demuxer = codec.demuxer_name().unwrap_or("h264");
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-probesize",
        "32",
        "-analyzeduration",
        "0",
        "-fflags",
        "+genpts+nobuffer",
        "-flags",
        "low_delay",
        "-f",
        demuxer,
        "-i",
        "pipe:0",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "bgr24",
        "-vf",
    ]
    .map(String::from)
    .to_vec();
    args.push(format!("scale={}:{}", width, height));
    args.push("pipe:1".into());
    args
}

/// Stateful decoder for one session's broadcast path: owns the external
/// decode process and the reader task that turns its output into JPEGs in
/// the [`LatestFrameCache`].
pub struct DecodePipeline {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl DecodePipeline {
    /// Spawn the decoder for the detected codec and start the reader task.
    /// A spawn failure is fatal to the session.
    pub fn start(
        bin: &str,
        codec: Codec,
        width: u32,
        height: u32,
        jpeg_quality: u8,
        cache: Arc<LatestFrameCache>,
        postprocess: Option<Arc<dyn FramePostprocess>>,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        let args = decode_args(codec, width, height);
        log::info!("decode: starting {} decoder ({}x{})", codec, width, height);

        let mut child = Command::new(bin)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::DecoderSpawn)?;

        let stdin = child.stdin.take();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("decode: {}", line);
                }
            });
        }

        if let Some(mut stdout) = child.stdout.take() {
            let frame_len = (width * height * 3) as usize;
            tokio::spawn(async move {
                let mut buf = vec![0u8; frame_len];
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        res = stdout.read_exact(&mut buf) => {
                            if res.is_err() {
                                log::info!("decode: output stream ended");
                                break;
                            }
                            let mut image = BgrImage {
                                width,
                                height,
                                data: buf.clone(),
                            };
                            if let Some(pp) = postprocess.as_ref() {
                                pp.process(&mut image);
                            }
                            match encode_jpeg(&image, jpeg_quality) {
                                Ok(jpeg) => cache.store(jpeg),
                                Err(e) => log::warn!("decode: jpeg encode failed: {}", e),
                            }
                        }
                    }
                }
            });
        }

        Ok(Self { child, stdin })
    }

    /// Best-effort write of one encoded frame into the decoder. Failures
    /// are logged and the frame dropped.
    pub async fn write_video(&mut self, data: &[u8]) {
        let Some(stdin) = self.stdin.as_mut() else {
            return;
        };
        if let Err(e) = stdin.write_all(data).await {
            log::warn!("decode: video write failed, dropping frame: {}", e);
        }
    }

    /// Close stdin, wait for a graceful exit, then force-terminate. Each
    /// step is guarded independently.
    pub async fn stop(&mut self) {
        drop(self.stdin.take());

        match tokio::time::timeout(STOP_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => log::info!("decode: exited with {}", status),
            Ok(Err(e)) => log::warn!("decode: wait failed: {}", e),
            Err(_) => {
                log::warn!("decode: no exit within {:?}, killing", STOP_GRACE);
                if let Err(e) = self.child.kill().await {
                    log::warn!("decode: kill failed: {}", e);
                }
            }
        }
    }
}

fn encode_jpeg(image: &BgrImage, quality: u8) -> anyhow::Result<Bytes> {
    let mut out = Vec::with_capacity(image.data.len() / 8);
    let encoder = Encoder::new(&mut out, quality);
    encoder.encode(
        &image.data,
        image.width as u16,
        image.height as u16,
        ColorType::Bgr,
    )?;
    Ok(Bytes::from(out))
}
