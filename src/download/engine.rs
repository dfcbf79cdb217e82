//! Download orchestration engine.
//!
//! One [`DownloadEngine::download`] call runs the whole lifecycle for a
//! request: workspace allocation, per-attempt option profiles with proxy
//! rotation, failure classification, backoff, and cleanup. Only two failures
//! ever cross this boundary: [`DownloadError::Exhausted`] and
//! [`DownloadError::Cancelled`].

use crate::core::config;
use crate::download::error::{classify, DownloadError, FailureKind};
use crate::download::invoker::{Artifacts, Invoker};
use crate::download::options::{build_profile, RequestedKind};
use crate::download::platform::{Platform, RetryPolicy};
use crate::download::proxy;
use crate::download::workspace::{ensure_session_root, Workspace};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// One user-facing download request.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: Url,
    /// Chat the request came from; keys the persistent session directory
    pub chat_id: i64,
    pub kind: RequestedKind,
}

/// Everything a successful orchestration call hands back.
///
/// The workspace is still alive; the caller releases it once the artifacts
/// have been delivered.
#[derive(Debug)]
pub struct DownloadOutcome {
    pub artifacts: Artifacts,
    pub title: String,
    pub workspace: Workspace,
    pub attempts: u32,
    pub platform: Platform,
}

/// The retry engine. Cheap to clone per task via `Arc`.
pub struct DownloadEngine {
    invoker: Invoker,
    data_dir: PathBuf,
}

impl Default for DownloadEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadEngine {
    pub fn new() -> Self {
        Self {
            invoker: Invoker::new(),
            data_dir: config::DATA_DIR.clone(),
        }
    }

    /// Engine with substituted capabilities and data directory.
    pub fn with_parts(invoker: Invoker, data_dir: PathBuf) -> Self {
        Self { invoker, data_dir }
    }

    /// Run a request to completion under the production policy for its
    /// platform.
    pub async fn download(
        &self,
        request: &DownloadRequest,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        let platform = Platform::classify(&request.url);
        self.download_with_policy(request, platform, &RetryPolicy::for_platform(platform), cancel)
            .await
    }

    /// Like [`download`](Self::download) but with an explicit policy, so the
    /// engine can be exercised with short schedules.
    pub async fn download_with_policy(
        &self,
        request: &DownloadRequest,
        platform: Platform,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        // setup failures are terminal; attempts = 0 marks that no
        // extraction call was ever made
        let session_root = ensure_session_root(&self.data_dir, request.chat_id)
            .map_err(|e| DownloadError::Exhausted {
                attempts: 0,
                last_error: format!("workspace setup failed: {}", e),
            })?;
        let workspace = Workspace::acquire(&session_root).map_err(|e| DownloadError::Exhausted {
            attempts: 0,
            last_error: format!("workspace setup failed: {}", e),
        })?;

        match self.run_attempts(request, platform, policy, &workspace, cancel).await {
            Ok((artifacts, title, attempts)) => Ok(DownloadOutcome {
                artifacts,
                title,
                workspace,
                attempts,
                platform,
            }),
            Err(e) => {
                // nothing usable was produced; reclaim the space now
                workspace.release();
                Err(e)
            }
        }
    }

    async fn run_attempts(
        &self,
        request: &DownloadRequest,
        platform: Platform,
        policy: &RetryPolicy,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<(Artifacts, String, u32), DownloadError> {
        let mut last_error = String::from("no attempts made");

        for attempt in 1..=policy.max_attempts {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            let selected_proxy = proxy::select_proxy();
            let profile = build_profile(platform, request.kind, attempt, selected_proxy);
            log::info!(
                "Download attempt {}/{} for {} ({})",
                attempt,
                policy.max_attempts,
                request.url,
                platform
            );

            match self.invoker.invoke(&request.url, &profile, workspace, request.kind).await {
                Ok((artifacts, title)) => {
                    log::info!("Download succeeded on attempt {}: {}", attempt, title);
                    return Ok((artifacts, title, attempt));
                }
                Err(DownloadError::Cancelled) => return Err(DownloadError::Cancelled),
                Err(e) => {
                    last_error = e.to_string();
                    let kind = classify(platform, &last_error);
                    log::warn!(
                        "Attempt {}/{} failed ({:?}): {}",
                        attempt,
                        policy.max_attempts,
                        kind,
                        last_error
                    );

                    if attempt == policy.max_attempts {
                        break;
                    }

                    let delay = delay_for(policy, kind, attempt);
                    log::debug!("Waiting {:?} before retry", delay);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        Err(DownloadError::Exhausted {
            attempts: policy.max_attempts,
            last_error,
        })
    }
}

/// The wait mandated by one failed attempt (1-based).
fn delay_for(policy: &RetryPolicy, kind: FailureKind, attempt: u32) -> Duration {
    match kind {
        FailureKind::TransientWarning => policy.transient_pause,
        FailureKind::RateLimited | FailureKind::LoginRequired => policy.throttle_delay(attempt),
        FailureKind::BotDetected => policy.linear_delay(attempt),
        FailureKind::Other => policy.exponential_delay(attempt),
    }
}
