use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};

use crate::error::Error;
use crate::media::types::Codec;

/// Grace period between closing stdin and force-killing the process.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Owns the external remux process: raw encoded video goes in on stdin,
/// an RTSP push comes out the other side. Codec copy only, no re-encode.
pub struct MuxerProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    running: bool,
}

/// Argument list for a codec-copy remux into an RTSP target.
///
/// Without audio the input side runs with zero probing/buffering so the
/// first keyframe reaches the wire immediately. With audio both inputs are
/// stamped from the wall clock (video and PCM arrive through physically
/// different channels) and the audio leg gets discontinuity resampling.
pub(crate) fn remux_args(codec: Codec, rtsp_url: &str, audio_fifo: Option<&Path>) -> Vec<String> {
    let demuxer = codec.demuxer_name().unwrap_or("h264");
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];

    match audio_fifo {
        None => {
            args.extend(
                [
                    "-probesize",
                    "32",
                    "-analyzeduration",
                    "0",
                    "-fflags",
                    "+genpts+nobuffer+discardcorrupt",
                    "-flags",
                    "low_delay",
                    "-f",
                    demuxer,
                    "-i",
                    "pipe:0",
                    "-c:v",
                    "copy",
                    "-an",
                    "-flush_packets",
                    "1",
                ]
                .map(String::from),
            );
        }
        Some(fifo) => {
            args.extend(
                [
                    // video input
                    "-use_wallclock_as_timestamps",
                    "1",
                    "-thread_queue_size",
                    "512",
                    "-fflags",
                    "+genpts",
                    "-f",
                    demuxer,
                    "-i",
                    "pipe:0",
                    // audio input: s16le mono 16 kHz from the FIFO
                    "-use_wallclock_as_timestamps",
                    "1",
                    "-thread_queue_size",
                    "512",
                    "-f",
                    "s16le",
                    "-ar",
                    "16000",
                    "-ac",
                    "1",
                    "-i",
                ]
                .map(String::from),
            );
            args.push(fifo.display().to_string());
            args.extend(
                [
                    "-map",
                    "0:v",
                    "-map",
                    "1:a",
                    "-c:v",
                    "copy",
                    "-c:a",
                    "aac",
                    "-ar",
                    "16000",
                    "-af",
                    "aresample=async=1:first_pts=0",
                ]
                .map(String::from),
            );
        }
    }

    args.extend(["-f".into(), "rtsp".into(), "-rtsp_transport".into(), "tcp".into()]);
    args.push(rtsp_url.to_string());
    args
}

impl MuxerProcess {
    /// Spawn the remux process for the detected codec. A spawn failure is
    /// fatal to the session and propagates.
    pub fn start(
        bin: &str,
        codec: Codec,
        rtsp_url: &str,
        audio_fifo: Option<&Path>,
    ) -> Result<Self, Error> {
        let args = remux_args(codec, rtsp_url, audio_fifo);
        log::info!("muxer: starting {} remux to {}", codec, rtsp_url);

        let mut child = Command::new(bin)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::MuxerSpawn)?;

        let stdin = child.stdin.take();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("muxer: {}", line);
                }
            });
        }

        Ok(Self {
            child,
            stdin,
            running: true,
        })
    }

    #[allow(dead_code)]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Best-effort write of one encoded frame. Any failure is logged and
    /// the frame dropped; live video favors loss over stalling, so the
    /// write is never retried and never fails the session.
    pub async fn write_video(&mut self, data: &[u8]) {
        let Some(stdin) = self.stdin.as_mut() else {
            return;
        };
        if let Err(e) = stdin.write_all(data).await {
            log::warn!("muxer: video write failed, dropping frame: {}", e);
        }
    }

    /// Close stdin so the process can flush, wait for a graceful exit,
    /// then force-terminate. Each step is guarded independently.
    pub async fn stop(&mut self) {
        self.running = false;
        drop(self.stdin.take());

        match tokio::time::timeout(STOP_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => log::info!("muxer: exited with {}", status),
            Ok(Err(e)) => log::warn!("muxer: wait failed: {}", e),
            Err(_) => {
                log::warn!("muxer: no exit within {:?}, killing", STOP_GRACE);
                if let Err(e) = self.child.kill().await {
                    log::warn!("muxer: kill failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_remux_args_video_only() {
        let args = remux_args(Codec::H264, "rtsp://127.0.0.1:8554/live", None);

        let f = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[f + 1], "h264");
        assert!(args.windows(2).any(|w| w[0] == "-c:v" && w[1] == "copy"));
        assert!(args.contains(&"-an".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-rtsp_transport" && w[1] == "tcp"));
        assert_eq!(args.last().unwrap(), "rtsp://127.0.0.1:8554/live");
        // low-latency input flags
        assert!(args.windows(2).any(|w| w[0] == "-probesize" && w[1] == "32"));
        assert!(args.contains(&"low_delay".to_string()));
    }

    #[test]
    fn test_remux_args_hevc_demuxer() {
        let args = remux_args(Codec::Hevc, "rtsp://127.0.0.1:8554/live", None);
        let f = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[f + 1], "hevc");
    }

    #[test]
    fn test_remux_args_with_audio() {
        let fifo = PathBuf::from("/tmp/cam_audio.fifo");
        let args = remux_args(Codec::Hevc, "rtsp://127.0.0.1:8554/live", Some(&fifo));

        assert!(args.contains(&"/tmp/cam_audio.fifo".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "s16le"));
        assert!(args.windows(2).any(|w| w[0] == "-ar" && w[1] == "16000"));
        assert!(args.windows(2).any(|w| w[0] == "-ac" && w[1] == "1"));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "0:v"));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "1:a"));
        assert!(args.windows(2).any(|w| w[0] == "-c:a" && w[1] == "aac"));
        assert!(args.contains(&"aresample=async=1:first_pts=0".to_string()));
        // both inputs stamped from the wall clock
        let wallclock = args
            .iter()
            .filter(|a| *a == "-use_wallclock_as_timestamps")
            .count();
        assert_eq!(wallclock, 2);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_fatal() {
        let err = MuxerProcess::start(
            "/nonexistent/ffmpeg-binary",
            Codec::H264,
            "rtsp://127.0.0.1:8554/live",
            None,
        )
        .err()
        .expect("spawn must fail");
        assert!(matches!(err, Error::MuxerSpawn(_)));
    }
}
