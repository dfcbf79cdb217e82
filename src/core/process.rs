//! Process execution utilities with timeout support
//!
//! Helpers for running external processes (yt-dlp, ffmpeg) with configurable
//! timeouts so a hung subprocess can never block a download task forever.

use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

use crate::download::error::DownloadError;

/// Run an async Command with a timeout.
///
/// Returns the process Output on success, or a DownloadError on timeout/IO failure.
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output, DownloadError> {
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(DownloadError::Extraction(format!("failed to spawn process: {}", e))),
        Err(_) => Err(DownloadError::Timeout(format!(
            "process timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

/// Returns the trailing lines of a subprocess stderr, for error messages.
///
/// yt-dlp prints progress noise before the actual error; the last few lines
/// are the ones worth surfacing.
pub fn stderr_tail(output: &Output, max_lines: usize) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_kicks_in() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let result = run_with_timeout(&mut cmd, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(DownloadError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_successful_command() {
        let mut cmd = Command::new("true");
        let output = run_with_timeout(&mut cmd, Duration::from_secs(5)).await.unwrap();
        assert!(output.status.success());
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        use std::os::unix::process::ExitStatusExt;
        let output = Output {
            status: std::process::ExitStatus::from_raw(0),
            stdout: Vec::new(),
            stderr: b"one\ntwo\n\nthree\nfour\n".to_vec(),
        };
        assert_eq!(stderr_tail(&output, 2), "three\nfour");
        assert_eq!(stderr_tail(&output, 10), "one\ntwo\nthree\nfour");
    }
}
