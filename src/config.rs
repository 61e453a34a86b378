use std::path::PathBuf;
use std::sync::LazyLock;

/// Process-wide configuration, read once from the environment.
pub struct RelayConfig {
    http_addr: String,
    rtsp_url: String,
    ffmpeg_bin: String,
    fifo_dir: PathBuf,
    decode_width: u32,
    decode_height: u32,
    jpeg_quality: u8,
    frame_queue_capacity: usize,
}

impl RelayConfig {
    fn from_env() -> Self {
        Self {
            http_addr: env_or("CAM_RELAY_HTTP_ADDR", "0.0.0.0:8080"),
            rtsp_url: env_or("CAM_RELAY_RTSP_URL", "rtsp://127.0.0.1:8554/live"),
            ffmpeg_bin: env_or("CAM_RELAY_FFMPEG", "ffmpeg"),
            fifo_dir: std::env::var("CAM_RELAY_FIFO_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir()),
            decode_width: env_parse_or("CAM_RELAY_DECODE_WIDTH", 1280),
            decode_height: env_parse_or("CAM_RELAY_DECODE_HEIGHT", 720),
            jpeg_quality: env_parse_or("CAM_RELAY_JPEG_QUALITY", 85),
            frame_queue_capacity: env_parse_or("CAM_RELAY_QUEUE_CAPACITY", 32),
        }
    }

    pub fn http_addr(&self) -> &str {
        &self.http_addr
    }

    /// Default RTSP push target for sessions that don't specify one.
    pub fn rtsp_url(&self) -> &str {
        &self.rtsp_url
    }

    pub fn ffmpeg_bin(&self) -> &str {
        &self.ffmpeg_bin
    }

    /// Directory the per-session audio FIFOs are created in.
    pub fn fifo_dir(&self) -> &PathBuf {
        &self.fifo_dir
    }

    pub fn decode_width(&self) -> u32 {
        self.decode_width
    }

    pub fn decode_height(&self) -> u32 {
        self.decode_height
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    pub fn frame_queue_capacity(&self) -> usize {
        self.frame_queue_capacity
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn config() -> &'static RelayConfig {
    static CONFIG: LazyLock<RelayConfig> = LazyLock::new(RelayConfig::from_env);
    &CONFIG
}
