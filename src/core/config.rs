use once_cell::sync::Lazy;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration constants for the bot

/// Root directory for per-chat download workspaces.
/// Read once at startup from DATA_DIR, defaults to "data".
pub static DATA_DIR: Lazy<PathBuf> =
    Lazy::new(|| PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string())));

/// Cached yt-dlp binary path.
/// Read once at startup from YTDL_BIN or defaults to "yt-dlp".
pub static YTDL_BIN: Lazy<String> = Lazy::new(|| env::var("YTDL_BIN").unwrap_or_else(|_| "yt-dlp".to_string()));

/// Cached ffmpeg binary path.
pub static FFMPEG_BIN: Lazy<String> = Lazy::new(|| env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()));

/// Optional newline-delimited proxy list file.
/// Lines starting with '#' and blank lines are ignored.
pub static PROXY_LIST_FILE: Lazy<Option<String>> = Lazy::new(|| env::var("PROXY_LIST_FILE").ok());

/// Maximum size of a file we attempt to send back to the chat, in bytes.
/// 0 disables the guard. Default matches a local Bot API server setup (~2 GB).
pub static MAX_UPLOAD_BYTES: Lazy<u64> = Lazy::new(|| {
    env::var("MAX_UPLOAD_BYTES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(2_097_152_000)
});

/// Telegram user ids with admin rights, comma-separated in ADMIN_IDS.
/// Users flagged is_admin in the database are honored as well.
pub static ADMIN_IDS: Lazy<Vec<i64>> = Lazy::new(|| {
    env::var("ADMIN_IDS")
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
});

/// Log file path for the file half of the combined logger.
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "klipchi.log".to_string()));

/// SQLite database path.
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "klipchi.sqlite".to_string()));

/// Download configuration
pub mod download {
    use super::Duration;

    /// Hard ceiling for a single yt-dlp invocation (its internal retries included)
    pub const YTDLP_TIMEOUT_SECS: u64 = 300;

    /// Ceiling for the ffmpeg audio-extraction subprocess
    pub const FFMPEG_TIMEOUT_SECS: u64 = 120;

    /// Target bitrate for derived MP3 tracks
    pub const AUDIO_BITRATE: &str = "192k";

    pub fn ytdlp_timeout() -> Duration {
        Duration::from_secs(YTDLP_TIMEOUT_SECS)
    }

    pub fn ffmpeg_timeout() -> Duration {
        Duration::from_secs(FFMPEG_TIMEOUT_SECS)
    }
}

/// Validation configuration
pub mod validation {
    /// Maximum URL length (RFC 7230 recommends 8000, but we use 2048 for safety)
    pub const MAX_URL_LENGTH: usize = 2048;
}

/// Background task configuration
pub mod tasks {
    use super::Duration;

    /// Interval between broadcast queue checks
    pub const BROADCAST_INTERVAL_SECS: u64 = 60;

    /// Interval between stale workspace sweeps
    pub const SWEEP_INTERVAL_SECS: u64 = 3600;

    /// Attempt directories older than this are removed by the sweeper
    pub const STALE_WORKSPACE_AGE_SECS: u64 = 7 * 24 * 3600;

    pub fn broadcast_interval() -> Duration {
        Duration::from_secs(BROADCAST_INTERVAL_SECS)
    }

    pub fn sweep_interval() -> Duration {
        Duration::from_secs(SWEEP_INTERVAL_SECS)
    }

    pub fn stale_workspace_age() -> Duration {
        Duration::from_secs(STALE_WORKSPACE_AGE_SECS)
    }
}
