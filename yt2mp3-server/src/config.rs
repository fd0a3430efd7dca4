//! Server configuration, loaded from environment variables at startup and
//! optionally overridden by command-line flags.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use yt2mp3_core::SlotPolicy;

/// Command-line overrides. Anything not given here comes from the
/// environment (see [`Config::from_env`]).
#[derive(Debug, Parser)]
#[command(name = "yt2mp3-server", version, about = "Convert video URLs to MP3 over HTTP")]
pub struct Cli {
    /// Interface to bind (overrides `YT2MP3_HOST`).
    #[arg(long)]
    pub host: Option<String>,

    /// TCP port to bind (overrides `YT2MP3_PORT` / `PORT`).
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Directory that holds produced audio (overrides `YT2MP3_UPLOAD_DIR`).
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,
}

/// Runtime configuration for yt2mp3-server.
///
/// Every field has a default so the server starts without any environment
/// variables set.
#[derive(Clone)]
pub struct Config {
    /// Interface to bind (default: `"0.0.0.0"`).
    pub host: String,

    /// TCP port (default: `5000`).
    pub port: u16,

    /// Where converted files are stored and served from (default: `"upload"`).
    pub upload_dir: PathBuf,

    /// Bundled audio served at `/default.mp3` (default: `"default.mp3"`).
    pub default_audio_path: PathBuf,

    /// Output naming policy: `fixed` or `increment`.
    pub slot_policy: SlotPolicy,

    /// MP3 bitrate in kbps.
    pub audio_quality: u32,

    /// Upper bound on one conversion request.
    pub convert_timeout: Duration,

    /// Requested parallel conversions. Values above 1 are clamped to 1 with a
    /// warning, since every run shares the same scratch file.
    pub max_concurrent: usize,

    /// Comma-separated CORS origins; `None` allows any origin.
    pub cors_allowed_origins: Option<String>,

    /// Serve the OpenAPI document at `/api-docs/openapi.json`.
    pub enable_docs: bool,

    /// Fetch an ffmpeg build next to the executable when none is found.
    pub auto_download_ffmpeg: bool,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// When set, logs go to a daily-rotated file in this directory.
    pub log_dir: Option<PathBuf>,

    /// Raw Netscape cookie text for sources that need a signed-in session.
    pub cookies: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 5000,
            upload_dir: PathBuf::from("upload"),
            default_audio_path: PathBuf::from("default.mp3"),
            slot_policy: SlotPolicy::Fixed,
            audio_quality: 192,
            convert_timeout: Duration::from_secs(600),
            max_concurrent: 1,
            cors_allowed_origins: None,
            enable_docs: true,
            auto_download_ffmpeg: false,
            log_level: "info".to_owned(),
            log_json: false,
            log_dir: None,
            cookies: None,
        }
    }
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let port = std::env::var("YT2MP3_PORT")
            .or_else(|_| std::env::var("PORT"))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        Self {
            host: env_or("YT2MP3_HOST", &defaults.host),
            port,
            upload_dir: env_path("YT2MP3_UPLOAD_DIR").unwrap_or(defaults.upload_dir),
            default_audio_path: env_path("YT2MP3_DEFAULT_AUDIO")
                .unwrap_or(defaults.default_audio_path),
            slot_policy: parse_env("YT2MP3_SLOT_POLICY", defaults.slot_policy),
            audio_quality: parse_env("YT2MP3_AUDIO_QUALITY", defaults.audio_quality),
            convert_timeout: Duration::from_secs(parse_env(
                "YT2MP3_CONVERT_TIMEOUT_SECS",
                defaults.convert_timeout.as_secs(),
            )),
            max_concurrent: parse_env("YT2MP3_MAX_CONCURRENT", defaults.max_concurrent).max(1),
            cors_allowed_origins: std::env::var("YT2MP3_CORS_ORIGINS").ok(),
            enable_docs: env_flag("YT2MP3_ENABLE_DOCS", defaults.enable_docs),
            auto_download_ffmpeg: env_flag(
                "YT2MP3_AUTO_DOWNLOAD_FFMPEG",
                defaults.auto_download_ffmpeg,
            ),
            log_level: env_or("YT2MP3_LOG", &defaults.log_level),
            log_json: env_flag("YT2MP3_LOG_JSON", defaults.log_json),
            log_dir: env_path("YT2MP3_LOG_DIR"),
            cookies: std::env::var("YOUTUBE_COOKIES")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }

    /// Apply command-line overrides on top of the environment.
    pub fn with_cli(mut self, cli: Cli) -> Self {
        if let Some(host) = cli.host {
            self.host = host;
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(dir) = cli.upload_dir {
            self.upload_dir = dir;
        }
        self
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("upload_dir", &self.upload_dir)
            .field("default_audio_path", &self.default_audio_path)
            .field("slot_policy", &self.slot_policy)
            .field("audio_quality", &self.audio_quality)
            .field("convert_timeout", &self.convert_timeout)
            .field("max_concurrent", &self.max_concurrent)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("enable_docs", &self.enable_docs)
            .field("auto_download_ffmpeg", &self.auto_download_ffmpeg)
            .field("log_level", &self.log_level)
            .field("log_json", &self.log_json)
            .field("log_dir", &self.log_dir)
            .field("cookies", &self.cookies.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
