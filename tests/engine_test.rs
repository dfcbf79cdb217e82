//! End-to-end tests of the retry engine with mocked external tools.

use async_trait::async_trait;
use klipchi::download::engine::{DownloadEngine, DownloadRequest};
use klipchi::download::error::DownloadError;
use klipchi::download::invoker::{FetchJob, Invoker, MediaFetcher, Transcoder};
use klipchi::download::options::RequestedKind;
use klipchi::download::platform::{Platform, RetryPolicy};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Fails the first `failures` calls with `error`, then writes the requested
/// file and succeeds.
struct FlakyFetcher {
    calls: AtomicU32,
    failures: u32,
    error: &'static str,
}

impl FlakyFetcher {
    fn new(failures: u32, error: &'static str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            failures,
            error,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaFetcher for FlakyFetcher {
    async fn fetch(&self, job: &FetchJob<'_>) -> Result<Option<String>, DownloadError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(DownloadError::Extraction(self.error.to_string()));
        }
        let path = job
            .output_template
            .to_string_lossy()
            .replace("%(ext)s", "mp4");
        std::fs::write(path, b"media").unwrap();
        Ok(Some("Test Clip".to_string()))
    }
}

struct NoopTranscoder;

#[async_trait]
impl Transcoder for NoopTranscoder {
    async fn extract_audio(&self, _video: &Path, audio: &Path) -> Result<(), DownloadError> {
        std::fs::write(audio, b"audio").unwrap();
        Ok(())
    }
}

/// Millisecond-scale policy so tests do not sleep for real.
fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        throttle_schedule: vec![
            Duration::from_millis(1),
            Duration::from_millis(2),
            Duration::from_millis(3),
        ],
        transient_pause: Duration::from_millis(1),
        linear_unit: Duration::from_millis(1),
        exponential_unit: Duration::from_millis(1),
    }
}

fn engine_with(fetcher: Arc<dyn MediaFetcher>, data_dir: &Path) -> DownloadEngine {
    DownloadEngine::with_parts(
        Invoker::with_parts(fetcher, Arc::new(NoopTranscoder)),
        data_dir.to_path_buf(),
    )
}

fn request(kind: RequestedKind) -> DownloadRequest {
    DownloadRequest {
        url: Url::parse("https://www.instagram.com/reel/XYZ/").unwrap(),
        chat_id: 77,
        kind,
    }
}

#[tokio::test]
async fn test_succeeds_after_transient_failures() {
    let tmp = TempDir::new().unwrap();
    let fetcher = FlakyFetcher::new(2, "ERROR: rate-limit reached");
    let engine = engine_with(fetcher.clone(), tmp.path());
    let cancel = CancellationToken::new();

    let outcome = engine
        .download_with_policy(
            &request(RequestedKind::Video),
            Platform::Instagram,
            &fast_policy(5),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 3);
    assert_eq!(fetcher.calls(), 3);
    assert_eq!(outcome.title, "Test Clip");
    let video = outcome.artifacts.video.clone().unwrap();
    assert!(video.exists());
    // artifacts live until the caller releases the workspace
    outcome.workspace.release();
    assert!(!video.exists());
}

#[tokio::test]
async fn test_exhaustion_reports_last_error_and_cleans_up() {
    let tmp = TempDir::new().unwrap();
    let fetcher = FlakyFetcher::new(u32::MAX, "ERROR: video unavailable");
    let engine = engine_with(fetcher.clone(), tmp.path());
    let cancel = CancellationToken::new();

    let err = engine
        .download_with_policy(
            &request(RequestedKind::Video),
            Platform::Instagram,
            &fast_policy(5),
            &cancel,
        )
        .await
        .unwrap_err();

    match err {
        DownloadError::Exhausted { attempts, last_error } => {
            assert_eq!(attempts, 5);
            assert!(last_error.contains("video unavailable"));
        }
        other => panic!("expected Exhausted, got {:?}", other),
    }
    assert_eq!(fetcher.calls(), 5);

    // the attempt directory is gone, the chat root survives
    let chat_root = tmp.path().join("chat_77");
    assert!(chat_root.is_dir());
    assert_eq!(std::fs::read_dir(&chat_root).unwrap().count(), 0);
}

#[tokio::test]
async fn test_attempt_ceiling_respected_per_policy() {
    let tmp = TempDir::new().unwrap();
    let fetcher = FlakyFetcher::new(u32::MAX, "boom");
    let engine = engine_with(fetcher.clone(), tmp.path());
    let cancel = CancellationToken::new();

    let err = engine
        .download_with_policy(
            &request(RequestedKind::Video),
            Platform::Generic,
            &fast_policy(3),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::Exhausted { attempts: 3, .. }));
    assert_eq!(fetcher.calls(), 3);
}

#[tokio::test]
async fn test_pre_cancelled_request_never_fetches() {
    let tmp = TempDir::new().unwrap();
    let fetcher = FlakyFetcher::new(0, "");
    let engine = engine_with(fetcher.clone(), tmp.path());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = engine
        .download_with_policy(
            &request(RequestedKind::Video),
            Platform::Generic,
            &fast_policy(3),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::Cancelled));
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_cancellation_interrupts_backoff() {
    let tmp = TempDir::new().unwrap();
    let fetcher = FlakyFetcher::new(u32::MAX, "boom");
    let engine = engine_with(fetcher.clone(), tmp.path());
    let cancel = CancellationToken::new();

    // seconds-long backoff so only cancellation can end the wait quickly
    let slow_policy = RetryPolicy {
        max_attempts: 5,
        throttle_schedule: vec![Duration::from_secs(60)],
        transient_pause: Duration::from_secs(60),
        linear_unit: Duration::from_secs(60),
        exponential_unit: Duration::from_secs(60),
    };

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_clone.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        engine.download_with_policy(
            &request(RequestedKind::Video),
            Platform::Generic,
            &slow_policy,
            &cancel,
        ),
    )
    .await
    .expect("cancellation must end the backoff promptly");

    assert!(matches!(result, Err(DownloadError::Cancelled)));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_dropping_outcome_reclaims_workspace() {
    let tmp = TempDir::new().unwrap();
    let engine = engine_with(FlakyFetcher::new(0, ""), tmp.path());
    let cancel = CancellationToken::new();

    let outcome = engine
        .download_with_policy(
            &request(RequestedKind::Video),
            Platform::Instagram,
            &fast_policy(5),
            &cancel,
        )
        .await
        .unwrap();

    let dir = outcome.workspace.dir().to_path_buf();
    assert!(dir.join("video.mp4").exists());
    // a caller bailing out early (failed delivery, ? operator) drops the
    // outcome without an explicit release; the workspace must not leak
    drop(outcome);
    assert!(!dir.exists());
    assert!(tmp.path().join("chat_77").is_dir());
}

#[tokio::test]
async fn test_workspace_setup_failure_is_terminal() {
    let tmp = TempDir::new().unwrap();
    // a plain file where the data dir should be makes session-root
    // creation fail before any extraction call
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let fetcher = FlakyFetcher::new(0, "");
    let engine = engine_with(fetcher.clone(), &blocker);
    let cancel = CancellationToken::new();

    let err = engine
        .download_with_policy(
            &request(RequestedKind::Video),
            Platform::Generic,
            &fast_policy(3),
            &cancel,
        )
        .await
        .unwrap_err();

    match err {
        DownloadError::Exhausted { attempts, last_error } => {
            assert_eq!(attempts, 0);
            assert!(last_error.contains("workspace setup failed"));
        }
        other => panic!("expected Exhausted, got {:?}", other),
    }
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_combined_request_yields_video_and_audio() {
    let tmp = TempDir::new().unwrap();
    let fetcher = FlakyFetcher::new(0, "");
    let engine = engine_with(fetcher, tmp.path());
    let cancel = CancellationToken::new();

    let outcome = engine
        .download_with_policy(
            &request(RequestedKind::Combined),
            Platform::Instagram,
            &fast_policy(5),
            &cancel,
        )
        .await
        .unwrap();

    assert!(outcome.artifacts.video.is_some());
    assert!(outcome.artifacts.audio.is_some());
    assert!(outcome.artifacts.gif.is_none());
    outcome.workspace.release();
}

#[tokio::test]
async fn test_concurrent_requests_use_isolated_workspaces() {
    let tmp = TempDir::new().unwrap();
    let engine = Arc::new(engine_with(FlakyFetcher::new(0, ""), tmp.path()));
    let cancel = CancellationToken::new();

    let request_a = request(RequestedKind::Video);
    let policy_a = fast_policy(5);
    let a = engine.download_with_policy(&request_a, Platform::Instagram, &policy_a, &cancel);
    let request_b = request(RequestedKind::Video);
    let policy_b = fast_policy(5);
    let b = engine.download_with_policy(&request_b, Platform::Instagram, &policy_b, &cancel);

    let (a, b) = tokio::join!(a, b);
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.workspace.dir(), b.workspace.dir());
    assert!(a.artifacts.video.as_ref().unwrap().exists());
    assert!(b.artifacts.video.as_ref().unwrap().exists());
    a.workspace.release();
    // releasing one workspace leaves the other intact
    assert!(b.artifacts.video.as_ref().unwrap().exists());
    b.workspace.release();
}
