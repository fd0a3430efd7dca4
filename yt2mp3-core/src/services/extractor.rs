//! The external extract-and-transcode step.
//!
//! [`Extractor`] is the seam between the conversion service and whatever
//! actually fetches the media. Production uses [`YtDlpExtractor`], which
//! drives the `yt-dlp` CLI and lets it call ffmpeg for the MP3 encode.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{ConvertError, UpstreamKind};
use crate::services::binary::BinaryResolver;

/// Longest extractor summary forwarded to callers.
const MAX_SUMMARY_CHARS: usize = 300;

/// Everything one extractor run needs.
#[derive(Debug, Clone, Copy)]
pub struct ExtractJob<'a> {
    pub url: &'a str,
    /// yt-dlp style output template, e.g. `upload/temp.%(ext)s`.
    pub output_template: &'a Path,
    /// Resolved ffmpeg executable.
    pub ffmpeg: &'a Path,
    pub cookie_file: Option<&'a Path>,
    /// Target MP3 bitrate in kbps.
    pub audio_quality: u32,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Fail fast when the extractor cannot run at all. Called before anything
    /// in the output directory is touched.
    fn check(&self) -> Result<(), ConvertError> {
        Ok(())
    }

    /// Download `job.url` and leave an MP3 at the output template.
    async fn extract(&self, job: ExtractJob<'_>) -> Result<(), ConvertError>;
}

/// Runs the `yt-dlp` executable as a child process.
///
/// The child is killed if the returned future is dropped, so a caller-side
/// timeout also stops the download.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    binary: BinaryResolver,
}

impl YtDlpExtractor {
    pub fn new() -> Self {
        Self {
            binary: BinaryResolver::yt_dlp(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_binary(binary: BinaryResolver) -> Self {
        Self { binary }
    }

    fn args(job: &ExtractJob<'_>) -> Vec<std::ffi::OsString> {
        let ffmpeg_location = job.ffmpeg.parent().unwrap_or(job.ffmpeg);
        let mut args: Vec<std::ffi::OsString> = vec![
            "--no-playlist".into(),
            "--no-progress".into(),
            "--format".into(),
            "bestaudio/best".into(),
            "--extract-audio".into(),
            "--audio-format".into(),
            "mp3".into(),
            "--audio-quality".into(),
            format!("{}K", job.audio_quality).into(),
            "--ffmpeg-location".into(),
            ffmpeg_location.as_os_str().to_owned(),
            "--output".into(),
            job.output_template.as_os_str().to_owned(),
        ];
        if let Some(cookies) = job.cookie_file {
            args.push("--cookies".into());
            args.push(cookies.as_os_str().to_owned());
        }
        // Keep a URL starting with '-' from being read as an option.
        args.push("--".into());
        args.push(job.url.into());
        args
    }
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn check(&self) -> Result<(), ConvertError> {
        self.binary.resolve().map(|_| ())
    }

    async fn extract(&self, job: ExtractJob<'_>) -> Result<(), ConvertError> {
        let program = self.binary.resolve()?;
        info!(url = %job.url, yt_dlp = %program.display(), "starting extraction");

        let output = Command::new(&program)
            .args(Self::args(&job))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    ConvertError::MissingDependency {
                        binary: self.binary.name().to_owned(),
                        hint: format!("{} could not be started: {e}", program.display()),
                    }
                }
                _ => ConvertError::UpstreamFailure {
                    kind: UpstreamKind::Other,
                    summary: format!("failed to run {}: {e}", self.binary.name()),
                    detail: String::new(),
                },
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            debug!("[yt-dlp] {}", line);
        }

        if output.status.success() {
            info!(url = %job.url, "extraction finished");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        warn!(url = %job.url, status = %output.status, "yt-dlp exited with failure");
        Err(upstream_failure(&stderr))
    }
}

/// Turn extractor stderr into an [`ConvertError::UpstreamFailure`].
pub fn upstream_failure(stderr: &str) -> ConvertError {
    ConvertError::UpstreamFailure {
        kind: classify(stderr),
        summary: summarize(stderr),
        detail: stderr.trim().to_owned(),
    }
}

/// Best guess at why the extractor failed.
pub fn classify(stderr: &str) -> UpstreamKind {
    let text = stderr.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(&["sign in to confirm", "login required", "use --cookies", "members-only", "private video"]) {
        UpstreamKind::AuthenticationRequired
    } else if has(&["not available in your country", "geo restrict", "geo-restrict", "blocked it in your country"]) {
        UpstreamKind::GeoRestricted
    } else if has(&["unsupported url", "is not a valid url"]) {
        UpstreamKind::UnsupportedUrl
    } else if has(&["video unavailable", "has been removed", "does not exist", "http error 404", "no video formats"]) {
        UpstreamKind::Unavailable
    } else if has(&[
        "unable to download webpage",
        "name or service not known",
        "temporary failure in name resolution",
        "connection refused",
        "timed out",
        "ssl",
    ]) {
        UpstreamKind::Network
    } else {
        UpstreamKind::Other
    }
}

/// Last `ERROR:` line of the output, or its last non-empty line, clipped.
fn summarize(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let line = lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .copied()
        .unwrap_or("extractor exited without output");
    let line = line.strip_prefix("ERROR:").map(str::trim).unwrap_or(line);

    if line.chars().count() > MAX_SUMMARY_CHARS {
        let clipped: String = line.chars().take(MAX_SUMMARY_CHARS).collect();
        format!("{clipped}…")
    } else {
        line.to_owned()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn args_disable_playlists_and_request_mp3() {
        let template = PathBuf::from("upload/temp.%(ext)s");
        let ffmpeg = PathBuf::from("/opt/ffmpeg/bin/ffmpeg");
        let job = ExtractJob {
            url: "https://example.com/video",
            output_template: &template,
            ffmpeg: &ffmpeg,
            cookie_file: None,
            audio_quality: 192,
        };

        let args: Vec<String> = YtDlpExtractor::args(&job)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(args.contains(&"--no-playlist".to_owned()));
        assert!(args.windows(2).any(|w| w == ["--audio-format", "mp3"]));
        assert!(args.windows(2).any(|w| w == ["--audio-quality", "192K"]));
        assert!(args.windows(2).any(|w| w == ["--ffmpeg-location", "/opt/ffmpeg/bin"]));
        assert!(args.windows(2).any(|w| w == ["--output", "upload/temp.%(ext)s"]));
        assert!(!args.contains(&"--cookies".to_owned()));
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/video"));
    }

    #[test]
    fn args_pass_cookie_file() {
        let template = PathBuf::from("upload/temp.%(ext)s");
        let ffmpeg = PathBuf::from("ffmpeg");
        let cookies = PathBuf::from("/tmp/jar.txt");
        let job = ExtractJob {
            url: "https://example.com/video",
            output_template: &template,
            ffmpeg: &ffmpeg,
            cookie_file: Some(&cookies),
            audio_quality: 128,
        };

        let args: Vec<String> = YtDlpExtractor::args(&job)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.windows(2).any(|w| w == ["--cookies", "/tmp/jar.txt"]));
    }

    #[test]
    fn classifies_common_failures() {
        assert_eq!(
            classify("ERROR: [youtube] abc: Video unavailable"),
            UpstreamKind::Unavailable
        );
        assert_eq!(
            classify("ERROR: [youtube] abc: Sign in to confirm you're not a bot. Use --cookies-from-browser"),
            UpstreamKind::AuthenticationRequired
        );
        assert_eq!(
            classify("ERROR: The uploader has not made this video available in your country"),
            UpstreamKind::GeoRestricted
        );
        assert_eq!(
            classify("ERROR: Unsupported URL: https://example.com/"),
            UpstreamKind::UnsupportedUrl
        );
        assert_eq!(
            classify("ERROR: Unable to download webpage: <urlopen error [Errno -2] Name or service not known>"),
            UpstreamKind::Network
        );
        assert_eq!(classify("something odd"), UpstreamKind::Other);
    }

    #[test]
    fn summary_is_last_error_line() {
        let stderr = "WARNING: falling back\nERROR: first\nnoise\nERROR: [youtube] x: Video unavailable\n";
        match upstream_failure(stderr) {
            ConvertError::UpstreamFailure { kind, summary, detail } => {
                assert_eq!(kind, UpstreamKind::Unavailable);
                assert_eq!(summary, "[youtube] x: Video unavailable");
                assert!(detail.contains("WARNING: falling back"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn summary_is_clipped() {
        let long = format!("ERROR: {}", "x".repeat(1000));
        assert!(summarize(&long).chars().count() <= MAX_SUMMARY_CHARS + 1);
        assert_eq!(summarize(""), "extractor exited without output");
    }
}
