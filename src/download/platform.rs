//! Platform classification and per-platform retry policy.
//!
//! The same failure text means different things depending on the site: an
//! Instagram "rate-limit reached" recovers after a cooldown, while most
//! generic-site failures are not worth prolonged waiting. The policy here is
//! data, not code, so the engine and tests can share it.

use std::time::Duration;
use url::Url;

/// Coarse classification of the target URL's origin site.
///
/// Drives option profiles (user-agent, format expression, bypass flags) and
/// the retry policy. Derived from the host, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Instagram,
    YouTube,
    /// Everything else yt-dlp can handle (TikTok, Twitter, ...)
    Generic,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Instagram => write!(f, "instagram"),
            Platform::YouTube => write!(f, "youtube"),
            Platform::Generic => write!(f, "generic"),
        }
    }
}

impl Platform {
    /// Classify a URL by its host. Unknown hosts fall back to `Generic`;
    /// whether a URL is accepted at all is decided by validation upstream.
    pub fn classify(url: &Url) -> Platform {
        let host = url.host_str().unwrap_or_default().to_lowercase();
        let matches = |domain: &str| host == domain || host.ends_with(&format!(".{}", domain));

        if matches("instagram.com") {
            Platform::Instagram
        } else if matches("youtube.com") || matches("youtu.be") {
            Platform::YouTube
        } else {
            Platform::Generic
        }
    }

    /// Whether this platform is known to throttle aggressively and recover
    /// after a cooldown. Gets the higher attempt ceiling and the escalating
    /// rate-limit schedule.
    pub fn is_throttled(self) -> bool {
        matches!(self, Platform::Instagram | Platform::YouTube)
    }
}

/// Escalating waits for rate-limit/login-required failures on throttled
/// platforms. Attempts past the end of the schedule reuse the last entry.
const THROTTLE_SCHEDULE_SECS: &[u64] = &[5, 15, 30, 60, 120, 180, 300];

/// Retry policy for one orchestration call.
///
/// Durations are fields rather than constants so tests can run the engine
/// with millisecond schedules.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Ceiling on extraction attempts for a single request
    pub max_attempts: u32,
    /// Escalating waits for platform rate-limit / login-required failures
    pub throttle_schedule: Vec<Duration>,
    /// Short fixed pause after a spurious platform warning
    pub transient_pause: Duration,
    /// Unit for the linear backoff on generic bot-detection signatures
    pub linear_unit: Duration,
    /// Unit for the exponential backoff on unclassified failures
    pub exponential_unit: Duration,
}

impl RetryPolicy {
    /// The production policy for a platform class.
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            max_attempts: if platform.is_throttled() { 5 } else { 3 },
            throttle_schedule: THROTTLE_SCHEDULE_SECS.iter().map(|s| Duration::from_secs(*s)).collect(),
            transient_pause: Duration::from_secs(2),
            linear_unit: Duration::from_secs(5),
            exponential_unit: Duration::from_secs(1),
        }
    }

    /// Wait before the retry that follows failed attempt `attempt` (1-based)
    /// on the escalating rate-limit schedule. Non-decreasing in `attempt`,
    /// constant past the schedule's tail.
    pub fn throttle_delay(&self, attempt: u32) -> Duration {
        let idx = (attempt.saturating_sub(1) as usize).min(self.throttle_schedule.len().saturating_sub(1));
        self.throttle_schedule.get(idx).copied().unwrap_or(self.transient_pause)
    }

    /// Linear wait for generic rate-limit/bot-detection signatures.
    pub fn linear_delay(&self, attempt: u32) -> Duration {
        self.linear_unit * attempt
    }

    /// Exponential wait (2^attempt units) for unclassified failures.
    pub fn exponential_delay(&self, attempt: u32) -> Duration {
        // Clamp the exponent; at the real ceilings this never triggers.
        self.exponential_unit * 2u32.saturating_pow(attempt.min(16))
    }
}
