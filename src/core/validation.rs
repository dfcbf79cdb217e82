//! Incoming link validation.
//!
//! Rejects anything that is not an http(s) link to a supported platform
//! before the download engine is ever entered.

use crate::core::config;
use crate::core::error::AppError;
use url::Url;

/// Domains the bot accepts links for. Matched against the host with
/// subdomain awareness (`vt.tiktok.com` matches `tiktok.com`).
pub const SUPPORTED_DOMAINS: &[&str] = &[
    "tiktok.com",
    "instagram.com",
    "youtube.com",
    "youtu.be",
    "twitter.com",
    "x.com",
];

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// Parse and validate a user-supplied link.
///
/// # Errors
///
/// Returns `AppError::Validation` when the text is too long, not a valid URL,
/// not http(s), or points at an unsupported domain.
pub fn parse_supported_url(text: &str) -> Result<Url, AppError> {
    let text = text.trim();

    if text.len() > config::validation::MAX_URL_LENGTH {
        return Err(AppError::Validation("URL is too long".to_string()));
    }

    let url = Url::parse(text).map_err(|_| AppError::Validation("not a valid URL".to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(AppError::Validation(format!("unsupported scheme: {}", url.scheme())));
    }

    let host = url
        .host_str()
        .map(str::to_lowercase)
        .ok_or_else(|| AppError::Validation("URL has no host".to_string()))?;

    if SUPPORTED_DOMAINS.iter().any(|d| host_matches(&host, d)) {
        Ok(url)
    } else {
        Err(AppError::Validation(format!("unsupported domain: {}", host)))
    }
}

/// Cheap boolean form of [`parse_supported_url`].
pub fn is_supported_url(text: &str) -> bool {
    parse_supported_url(text).is_ok()
}
