//! Single-attempt extraction: drive the fetcher, canonicalize its output,
//! and derive the audio track when asked.
//!
//! The fetcher and transcoder sit behind traits so the engine can be tested
//! without yt-dlp/ffmpeg on the machine. Errors propagate with the tool's
//! message intact; classification happens one layer up, in the engine.

use crate::core::{config, process};
use crate::download::error::DownloadError;
use crate::download::options::{OptionProfile, RequestedKind};
use crate::download::workspace::Workspace;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use url::Url;

/// Local media files produced by one orchestration call.
///
/// Absent artifacts are `None`, never empty files.
#[derive(Debug, Default)]
pub struct Artifacts {
    pub video: Option<PathBuf>,
    pub audio: Option<PathBuf>,
    pub gif: Option<PathBuf>,
    pub image: Option<PathBuf>,
}

/// How the fetcher should be invoked for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Fetch the selected video/muxed stream
    Video,
    /// Fetch best-audio and post-process it to MP3 in one call
    AudioOnly,
    /// Fetch the best available stream for an animation
    Gif,
    /// Write only the thumbnail, skip the media download
    Thumbnail,
}

/// One call into the extraction capability.
#[derive(Debug)]
pub struct FetchJob<'a> {
    pub url: &'a Url,
    pub profile: &'a OptionProfile,
    /// Output template; `%(ext)s` is substituted by the tool
    pub output_template: PathBuf,
    pub mode: FetchMode,
}

/// The black-box extraction capability (yt-dlp in production).
///
/// Returns the media title when the tool reports one. Failure carries the
/// tool's message unchanged.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, job: &FetchJob<'_>) -> Result<Option<String>, DownloadError>;
}

/// External audio transcoder (ffmpeg in production).
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn extract_audio(&self, video: &Path, audio: &Path) -> Result<(), DownloadError>;
}

/// Production fetcher shelling out to yt-dlp.
pub struct YtDlpFetcher;

impl YtDlpFetcher {
    fn build_args(job: &FetchJob<'_>) -> Vec<String> {
        let profile = job.profile;
        let mut args: Vec<String> = vec![
            "--no-playlist".into(),
            "--no-progress".into(),
            "--no-check-certificates".into(),
            "--socket-timeout".into(),
            profile.socket_timeout.as_secs().to_string(),
            "--retries".into(),
            profile.retries.to_string(),
            "--fragment-retries".into(),
            profile.fragment_retries.to_string(),
            "--extractor-retries".into(),
            profile.extractor_retries.to_string(),
            "--concurrent-fragments".into(),
            profile.concurrent_fragments.to_string(),
            "--user-agent".into(),
            profile.user_agent.into(),
            "--add-headers".into(),
            format!("Accept-Language:{}", profile.accept_language),
        ];

        if let Some(proxy) = &profile.proxy {
            args.push("--proxy".into());
            args.push(proxy.to_url());
        }

        for extractor_arg in &profile.extractor_args {
            args.push("--extractor-args".into());
            args.push(extractor_arg.clone());
        }

        match job.mode {
            FetchMode::Video | FetchMode::Gif => {
                args.push("-f".into());
                args.push(profile.format.clone());
                if let Some(merge) = profile.merge_output_format {
                    args.push("--merge-output-format".into());
                    args.push(merge.into());
                }
            }
            FetchMode::AudioOnly => {
                args.push("-f".into());
                args.push(profile.format.clone());
                args.push("-x".into());
                args.push("--audio-format".into());
                args.push("mp3".into());
                args.push("--audio-quality".into());
                args.push(config::download::AUDIO_BITRATE.into());
            }
            FetchMode::Thumbnail => {
                args.push("--skip-download".into());
                args.push("--write-thumbnail".into());
                args.push("--convert-thumbnails".into());
                args.push("jpg".into());
            }
        }

        args.push("-o".into());
        args.push(job.output_template.to_string_lossy().into_owned());
        // have the download run AND print the title on stdout
        args.push("--no-simulate".into());
        args.push("--print".into());
        args.push("title".into());
        args.push(job.url.as_str().into());
        args
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(&self, job: &FetchJob<'_>) -> Result<Option<String>, DownloadError> {
        let args = Self::build_args(job);
        log::debug!("yt-dlp {}", args.join(" "));

        let mut cmd = Command::new(&*config::YTDL_BIN);
        cmd.args(&args);
        let output = process::run_with_timeout(&mut cmd, config::download::ytdlp_timeout()).await?;

        if !output.status.success() {
            return Err(DownloadError::Extraction(process::stderr_tail(&output, 5)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let title = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty() && *l != "NA")
            .map(str::to_string);
        Ok(title)
    }
}

/// Production transcoder shelling out to ffmpeg.
pub struct FfmpegTranscoder;

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn extract_audio(&self, video: &Path, audio: &Path) -> Result<(), DownloadError> {
        let mut cmd = Command::new(&*config::FFMPEG_BIN);
        cmd.arg("-y")
            .arg("-i")
            .arg(video)
            .arg("-vn")
            .arg("-acodec")
            .arg("libmp3lame")
            .arg("-b:a")
            .arg(config::download::AUDIO_BITRATE)
            .arg(audio);

        let output = process::run_with_timeout(&mut cmd, config::download::ffmpeg_timeout())
            .await
            .map_err(|e| DownloadError::Transcode(e.to_string()))?;

        if !output.status.success() {
            return Err(DownloadError::Transcode(process::stderr_tail(&output, 3)));
        }
        if !audio.exists() {
            return Err(DownloadError::Transcode("ffmpeg produced no output file".to_string()));
        }
        Ok(())
    }
}

/// Executes one extraction attempt inside a workspace.
pub struct Invoker {
    fetcher: Arc<dyn MediaFetcher>,
    transcoder: Arc<dyn Transcoder>,
}

impl Default for Invoker {
    fn default() -> Self {
        Self::new()
    }
}

impl Invoker {
    pub fn new() -> Self {
        Self {
            fetcher: Arc::new(YtDlpFetcher),
            transcoder: Arc::new(FfmpegTranscoder),
        }
    }

    /// Swap in alternative capabilities (used by tests and the CLI dry path).
    pub fn with_parts(fetcher: Arc<dyn MediaFetcher>, transcoder: Arc<dyn Transcoder>) -> Self {
        Self { fetcher, transcoder }
    }

    /// Run one extraction attempt for `kind`, leaving canonical artifacts in
    /// the workspace. Propagates the fetcher's error unchanged on failure.
    pub async fn invoke(
        &self,
        url: &Url,
        profile: &OptionProfile,
        workspace: &Workspace,
        kind: RequestedKind,
    ) -> Result<(Artifacts, String), DownloadError> {
        let mut artifacts = Artifacts::default();

        let title = match kind {
            RequestedKind::Video | RequestedKind::Combined => {
                let job = FetchJob {
                    url,
                    profile,
                    output_template: workspace.dir().join("video.%(ext)s"),
                    mode: FetchMode::Video,
                };
                let title = self.fetcher.fetch(&job).await?;

                let video = workspace.video_path();
                ensure_canonical(workspace.dir(), "video", &video)?;
                artifacts.video = Some(video.clone());

                if kind == RequestedKind::Combined {
                    let audio = workspace.audio_path();
                    match self.transcoder.extract_audio(&video, &audio).await {
                        Ok(()) => artifacts.audio = Some(audio),
                        // the video alone is still a usable result
                        Err(e) => log::warn!("Audio extraction failed, sending video only: {}", e),
                    }
                }
                title
            }
            RequestedKind::Audio => {
                let job = FetchJob {
                    url,
                    profile,
                    output_template: workspace.dir().join("audio.%(ext)s"),
                    mode: FetchMode::AudioOnly,
                };
                let title = self.fetcher.fetch(&job).await?;

                let audio = workspace.audio_path();
                ensure_canonical(workspace.dir(), "audio", &audio)?;
                artifacts.audio = Some(audio);
                title
            }
            RequestedKind::Gif => {
                let job = FetchJob {
                    url,
                    profile,
                    output_template: workspace.dir().join("animation.%(ext)s"),
                    mode: FetchMode::Gif,
                };
                let title = self.fetcher.fetch(&job).await?;

                let gif = workspace.gif_path();
                ensure_canonical(workspace.dir(), "animation", &gif)?;
                artifacts.gif = Some(gif);
                title
            }
            RequestedKind::Image => {
                let job = FetchJob {
                    url,
                    profile,
                    output_template: workspace.dir().join("image.%(ext)s"),
                    mode: FetchMode::Thumbnail,
                };
                let title = self.fetcher.fetch(&job).await?;

                let image = workspace.image_path();
                ensure_canonical(workspace.dir(), "image", &image)?;
                artifacts.image = Some(image);
                title
            }
        };

        let title = title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| kind.placeholder_title().to_string());

        Ok((artifacts, title))
    }
}

/// Make sure the artifact sits at its canonical path.
///
/// The tool may have chosen an unexpected extension; find any file with the
/// expected base name and rename it. Idempotent: an already-canonical file is
/// left alone.
fn ensure_canonical(dir: &Path, stem: &str, canonical: &Path) -> Result<(), DownloadError> {
    if canonical.exists() {
        return Ok(());
    }

    let entries = std::fs::read_dir(dir)
        .map_err(|e| DownloadError::ArtifactMissing(format!("cannot read workspace: {}", e)))?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && path.file_stem().and_then(|s| s.to_str()) == Some(stem) {
            std::fs::rename(&path, canonical)
                .map_err(|e| DownloadError::ArtifactMissing(format!("rename failed: {}", e)))?;
            return Ok(());
        }
    }

    Err(DownloadError::ArtifactMissing(format!(
        "no {} file in {}",
        stem,
        dir.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::options::build_profile;
    use crate::download::platform::Platform;
    use crate::download::workspace::ensure_session_root;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Writes a file derived from the output template, with a configurable
    /// extension to exercise the rename fallback.
    struct FakeFetcher {
        ext: &'static str,
        title: Option<&'static str>,
    }

    #[async_trait]
    impl MediaFetcher for FakeFetcher {
        async fn fetch(&self, job: &FetchJob<'_>) -> Result<Option<String>, DownloadError> {
            let template = job.output_template.to_string_lossy().into_owned();
            let path = template.replace("%(ext)s", self.ext);
            std::fs::write(&path, b"media").unwrap();
            Ok(self.title.map(str::to_string))
        }
    }

    struct CountingTranscoder {
        calls: AtomicU32,
        fail: bool,
    }

    impl CountingTranscoder {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl Transcoder for CountingTranscoder {
        async fn extract_audio(&self, _video: &Path, audio: &Path) -> Result<(), DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DownloadError::Transcode("boom".to_string()));
            }
            std::fs::write(audio, b"audio").unwrap();
            Ok(())
        }
    }

    fn setup(ext: &'static str, title: Option<&'static str>, fail_transcode: bool) -> (TempDir, Workspace, Invoker, Arc<CountingTranscoder>) {
        let tmp = TempDir::new().unwrap();
        let root = ensure_session_root(tmp.path(), 1).unwrap();
        let ws = Workspace::acquire(&root).unwrap();
        let transcoder = Arc::new(CountingTranscoder::new(fail_transcode));
        let invoker = Invoker::with_parts(Arc::new(FakeFetcher { ext, title }), transcoder.clone());
        (tmp, ws, invoker, transcoder)
    }

    fn test_url() -> Url {
        Url::parse("https://www.tiktok.com/@user/video/1").unwrap()
    }

    #[tokio::test]
    async fn test_video_renamed_to_canonical() {
        let (_tmp, ws, invoker, transcoder) = setup("webm", Some("A Clip"), false);
        let profile = build_profile(Platform::Generic, RequestedKind::Video, 1, None);

        let (artifacts, title) = invoker
            .invoke(&test_url(), &profile, &ws, RequestedKind::Video)
            .await
            .unwrap();

        assert_eq!(title, "A Clip");
        assert_eq!(artifacts.video.as_deref(), Some(ws.video_path().as_path()));
        assert!(ws.video_path().exists());
        // video requests never touch the transcoder
        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 0);
        assert!(artifacts.audio.is_none());
    }

    #[tokio::test]
    async fn test_canonical_name_is_idempotent() {
        let (_tmp, ws, invoker, _) = setup("mp4", None, false);
        let profile = build_profile(Platform::Generic, RequestedKind::Video, 1, None);

        // first pass leaves video.mp4; a second invoke with the canonical
        // file already present must not error
        invoker
            .invoke(&test_url(), &profile, &ws, RequestedKind::Video)
            .await
            .unwrap();
        let (artifacts, title) = invoker
            .invoke(&test_url(), &profile, &ws, RequestedKind::Video)
            .await
            .unwrap();

        assert!(artifacts.video.is_some());
        assert_eq!(title, "Video"); // placeholder when extractor has none
    }

    #[tokio::test]
    async fn test_combined_produces_both() {
        let (_tmp, ws, invoker, transcoder) = setup("mp4", Some("Reel Title"), false);
        let profile = build_profile(Platform::Instagram, RequestedKind::Combined, 1, None);

        let (artifacts, _) = invoker
            .invoke(&test_url(), &profile, &ws, RequestedKind::Combined)
            .await
            .unwrap();

        assert!(artifacts.video.is_some());
        assert!(artifacts.audio.is_some());
        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_combined_survives_transcode_failure() {
        let (_tmp, ws, invoker, _) = setup("mp4", Some("T"), true);
        let profile = build_profile(Platform::Generic, RequestedKind::Combined, 1, None);

        let (artifacts, _) = invoker
            .invoke(&test_url(), &profile, &ws, RequestedKind::Combined)
            .await
            .unwrap();

        assert!(artifacts.video.is_some());
        assert!(artifacts.audio.is_none());
    }

    #[tokio::test]
    async fn test_audio_request_yields_no_video() {
        let (_tmp, ws, invoker, transcoder) = setup("mp3", Some("Song"), false);
        let profile = build_profile(Platform::Generic, RequestedKind::Audio, 1, None);

        let (artifacts, _) = invoker
            .invoke(&test_url(), &profile, &ws, RequestedKind::Audio)
            .await
            .unwrap();

        assert!(artifacts.video.is_none());
        assert_eq!(artifacts.audio.as_deref(), Some(ws.audio_path().as_path()));
        // audio comes straight from the fetcher's post-processing
        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_reported() {
        struct NoOpFetcher;

        #[async_trait]
        impl MediaFetcher for NoOpFetcher {
            async fn fetch(&self, _job: &FetchJob<'_>) -> Result<Option<String>, DownloadError> {
                Ok(Some("ghost".to_string()))
            }
        }

        let tmp = TempDir::new().unwrap();
        let root = ensure_session_root(tmp.path(), 2).unwrap();
        let ws = Workspace::acquire(&root).unwrap();
        let invoker = Invoker::with_parts(Arc::new(NoOpFetcher), Arc::new(CountingTranscoder::new(false)));
        let profile = build_profile(Platform::Generic, RequestedKind::Video, 1, None);

        let err = invoker
            .invoke(&test_url(), &profile, &ws, RequestedKind::Video)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::ArtifactMissing(_)));
    }

    #[test]
    fn test_ytdlp_args_carry_profile() {
        let tmp = TempDir::new().unwrap();
        let profile = build_profile(
            Platform::Instagram,
            RequestedKind::Video,
            1,
            crate::download::proxy::Proxy::parse("socks5://10.0.0.1:1080"),
        );
        let url = test_url();
        let job = FetchJob {
            url: &url,
            profile: &profile,
            output_template: tmp.path().join("video.%(ext)s"),
            mode: FetchMode::Video,
        };
        let args = YtDlpFetcher::build_args(&job);

        assert!(args.contains(&"--proxy".to_string()));
        assert!(args.contains(&"socks5://10.0.0.1:1080".to_string()));
        assert!(args.contains(&"--socket-timeout".to_string()));
        assert!(args.contains(&"120".to_string()));
        assert!(args.contains(&"--extractor-args".to_string()));
        assert!(args.iter().any(|a| a.contains("skip_login")));
        assert_eq!(args.last().map(String::as_str), Some(url.as_str()));
    }

    #[test]
    fn test_thumbnail_args_skip_download() {
        let tmp = TempDir::new().unwrap();
        let profile = build_profile(Platform::Generic, RequestedKind::Image, 1, None);
        let url = test_url();
        let job = FetchJob {
            url: &url,
            profile: &profile,
            output_template: tmp.path().join("image.%(ext)s"),
            mode: FetchMode::Thumbnail,
        };
        let args = YtDlpFetcher::build_args(&job);
        assert!(args.contains(&"--skip-download".to_string()));
        assert!(args.contains(&"--write-thumbnail".to_string()));
    }
}
