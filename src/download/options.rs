//! Option profile construction.
//!
//! A single pure function maps `(platform, kind, attempt, proxy)` to the
//! full set of extraction options. This replaces the ad-hoc merged option
//! dictionaries the bot grew over time: one deterministic builder, called
//! fresh every attempt so the proxy rotates with it.

use crate::download::platform::Platform;
use crate::download::proxy::Proxy;
use std::time::Duration;

/// What the requester wants back from one orchestration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedKind {
    Video,
    Audio,
    Gif,
    Image,
    /// Video plus a derived MP3 track
    Combined,
}

impl RequestedKind {
    /// Title fallback when the extractor supplies none.
    pub fn placeholder_title(self) -> &'static str {
        match self {
            RequestedKind::Video => "Video",
            RequestedKind::Audio => "Audio",
            RequestedKind::Gif => "GIF",
            RequestedKind::Image => "Image",
            RequestedKind::Combined => "Media",
        }
    }
}

impl std::str::FromStr for RequestedKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "video" => Ok(RequestedKind::Video),
            "audio" => Ok(RequestedKind::Audio),
            "gif" => Ok(RequestedKind::Gif),
            "image" => Ok(RequestedKind::Image),
            "combined" => Ok(RequestedKind::Combined),
            other => Err(format!("unknown kind: {}", other)),
        }
    }
}

/// Desktop Chrome identity for generic/YouTube targets.
const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/121 Safari/537.36";

/// Mobile Safari identity for Instagram. Its bot-detection heuristics are
/// tuned far more aggressively against desktop signatures.
const MOBILE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 \
                         (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

/// Everything one extraction attempt needs, built fresh per attempt.
#[derive(Debug, Clone)]
pub struct OptionProfile {
    pub user_agent: &'static str,
    pub accept_language: &'static str,
    pub socket_timeout: Duration,
    /// How often the extraction call internally retries before surfacing an
    /// error to the orchestration layer (independent of the engine's loop)
    pub retries: u32,
    pub fragment_retries: u32,
    pub extractor_retries: u32,
    pub concurrent_fragments: u32,
    /// yt-dlp format-selection expression
    pub format: String,
    pub merge_output_format: Option<&'static str>,
    /// Platform-specific `--extractor-args` entries. These skip interactive
    /// steps and exhaustive probing to cut round-trips per attempt.
    pub extractor_args: Vec<String>,
    pub proxy: Option<Proxy>,
}

/// Build the option profile for one attempt. Pure function of its inputs.
pub fn build_profile(platform: Platform, kind: RequestedKind, attempt: u32, proxy: Option<Proxy>) -> OptionProfile {
    let mut profile = match platform {
        Platform::Instagram => OptionProfile {
            user_agent: MOBILE_UA,
            accept_language: "en-US,en;q=0.9",
            socket_timeout: Duration::from_secs(120),
            retries: 20,
            fragment_retries: 20,
            extractor_retries: 15,
            // sequential fragments trip detection less often
            concurrent_fragments: 1,
            // adaptive-stream negotiation is unreliable here; take the best
            // already-muxed stream instead of merging
            format: "b[ext=mp4]/b".to_string(),
            merge_output_format: None,
            extractor_args: vec!["instagram:skip_login=true;check_all=false".to_string()],
            proxy,
        },
        Platform::YouTube | Platform::Generic => OptionProfile {
            user_agent: DESKTOP_UA,
            accept_language: "en-US,en;q=0.9",
            socket_timeout: Duration::from_secs(30),
            retries: 3,
            fragment_retries: 3,
            extractor_retries: 3,
            concurrent_fragments: 4,
            format: "bv*+ba/b[ext=mp4]/b".to_string(),
            merge_output_format: Some("mp4"),
            extractor_args: Vec::new(),
            proxy,
        },
    };

    // After two failed merge attempts, stop negotiating separate streams and
    // take the best muxed one.
    if attempt > 2 && profile.merge_output_format.is_some() {
        profile.format = "b[ext=mp4]/b".to_string();
        profile.merge_output_format = None;
    }

    match kind {
        RequestedKind::Audio => {
            profile.format = "bestaudio/best".to_string();
            profile.merge_output_format = None;
        }
        RequestedKind::Gif | RequestedKind::Image => {
            profile.format = "best".to_string();
            profile.merge_output_format = None;
        }
        RequestedKind::Video | RequestedKind::Combined => {}
    }

    profile
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instagram_gets_mobile_identity() {
        let p = build_profile(Platform::Instagram, RequestedKind::Video, 1, None);
        assert!(p.user_agent.contains("iPhone"));
        assert_eq!(p.socket_timeout, Duration::from_secs(120));
        assert_eq!(p.retries, 20);
        assert_eq!(p.concurrent_fragments, 1);
        assert!(p.extractor_args.iter().any(|a| a.contains("skip_login")));
        // no merge step for instagram
        assert!(p.merge_output_format.is_none());
    }

    #[test]
    fn test_youtube_gets_desktop_identity_and_merge() {
        let p = build_profile(Platform::YouTube, RequestedKind::Video, 1, None);
        assert!(p.user_agent.contains("Windows NT"));
        assert_eq!(p.format, "bv*+ba/b[ext=mp4]/b");
        assert_eq!(p.merge_output_format, Some("mp4"));
        assert_eq!(p.retries, 3);
    }

    #[test]
    fn test_late_attempts_fall_back_to_muxed() {
        let p = build_profile(Platform::YouTube, RequestedKind::Video, 3, None);
        assert_eq!(p.format, "b[ext=mp4]/b");
        assert!(p.merge_output_format.is_none());
    }

    #[test]
    fn test_audio_kind_requests_bestaudio() {
        let p = build_profile(Platform::YouTube, RequestedKind::Audio, 1, None);
        assert_eq!(p.format, "bestaudio/best");
        assert!(p.merge_output_format.is_none());
    }

    #[test]
    fn test_profile_is_deterministic() {
        let a = build_profile(Platform::Instagram, RequestedKind::Combined, 2, None);
        let b = build_profile(Platform::Instagram, RequestedKind::Combined, 2, None);
        assert_eq!(a.format, b.format);
        assert_eq!(a.retries, b.retries);
        assert_eq!(a.extractor_args, b.extractor_args);
    }
}
