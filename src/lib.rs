//! klipchi is a Telegram bot that downloads social media videos with yt-dlp,
//! derives MP3 tracks with ffmpeg, and sends both back to the chat.
//!
//! The interesting part lives in [`download`]: a retry engine that
//! classifies extractor failures per platform and picks the matching backoff
//! schedule, rotating proxies and option profiles between attempts.

pub mod cli;
pub mod core;
pub mod download;
pub mod storage;
pub mod telegram;

pub use crate::core::{AppError, AppResult};
pub use crate::download::{DownloadEngine, DownloadError, DownloadRequest, RequestedKind};
