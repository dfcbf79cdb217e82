//! Download error types and failure classification.
//!
//! The extraction tool reports failures as free text, so classification is
//! substring matching and inherently fragile. All matching rules live behind
//! [`classify`] so they can be unit-tested and extended without touching the
//! retry state machine.

use crate::download::platform::Platform;
use thiserror::Error;

/// Structured error type for download operations.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The extraction tool failed; carries its message verbatim
    #[error("{0}")]
    Extraction(String),

    /// Extraction reported success but the expected file is absent,
    /// even after the rename-fallback search
    #[error("downloaded file not found: {0}")]
    ArtifactMissing(String),

    /// The external transcoder failed or produced no output
    #[error("audio transcode failed: {0}")]
    Transcode(String),

    /// A subprocess exceeded its time ceiling
    #[error("timed out: {0}")]
    Timeout(String),

    /// The surrounding request was cancelled mid-call
    #[error("download cancelled")]
    Cancelled,

    /// Terminal: the attempt ceiling was reached.
    /// The only failure (besides Cancelled) that crosses the engine boundary.
    #[error("download failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

impl DownloadError {
    /// Short diagnostic excerpt safe to show a user.
    pub fn user_excerpt(&self) -> String {
        let msg = self.to_string();
        let mut excerpt: String = msg.chars().take(120).collect();
        if excerpt.len() < msg.len() {
            excerpt.push('…');
        }
        excerpt
    }
}

/// What a failed attempt means for the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Spurious extractor complaint, safe to retry after a short fixed pause
    TransientWarning,
    /// The platform is throttling; escalating cooldown schedule applies
    RateLimited,
    /// The platform demands interactive auth; treated like a rate limit
    LoginRequired,
    /// Generic anti-automation signature; linear backoff
    BotDetected,
    /// Anything else; exponential backoff
    Other,
}

/// Classify an attempt failure by matching substrings of its message.
///
/// Rules are evaluated platform-specific first: `RateLimited` and
/// `LoginRequired` are only produced for platforms known to enforce
/// aggressive throttling (Instagram, YouTube); the same text on a generic
/// site falls through to the `BotDetected` signature match.
pub fn classify(platform: Platform, message: &str) -> FailureKind {
    let lower = message.to_lowercase();

    match platform {
        Platform::Instagram => {
            if lower.contains("general metadata extraction failed")
                || lower.contains("unable to extract additional metadata")
            {
                return FailureKind::TransientWarning;
            }
            if lower.contains("rate-limit reached") || lower.contains("rate limit") {
                return FailureKind::RateLimited;
            }
            if lower.contains("login required")
                || lower.contains("requested content is not available")
                || lower.contains("locked behind the login page")
            {
                return FailureKind::LoginRequired;
            }
        }
        Platform::YouTube => {
            if lower.contains("nsig extraction failed") {
                return FailureKind::TransientWarning;
            }
            if lower.contains("http error 429") || lower.contains("too many requests") {
                return FailureKind::RateLimited;
            }
            if lower.contains("sign in to confirm") || lower.contains("please sign in") {
                return FailureKind::LoginRequired;
            }
        }
        Platform::Generic => {}
    }

    // Platform-agnostic anti-automation signatures
    if lower.contains("429")
        || lower.contains("too many requests")
        || lower.contains("rate limit")
        || lower.contains("rate-limit")
        || lower.contains("captcha")
        || lower.contains("bot detection")
        || lower.contains("http error 403")
    {
        return FailureKind::BotDetected;
    }

    FailureKind::Other
}
