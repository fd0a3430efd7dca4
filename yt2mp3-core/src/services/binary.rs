//! Locating external executables (ffmpeg, yt-dlp).
//!
//! Lookup order is fixed:
//! 1. the executable search path (`PATH`),
//! 2. the directory holding the running server executable,
//! 3. the current working directory.
//!
//! Each step can be redirected or switched off, which is how the tests build
//! a sandboxed resolver.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::task;
use tracing::{debug, info};

use crate::error::ConvertError;

pub const FFMPEG: &str = "ffmpeg";
pub const YT_DLP: &str = "yt-dlp";

#[derive(Debug, Clone)]
enum SearchPath {
    Env,
    Custom(OsString),
}

#[derive(Debug, Clone)]
enum Dir {
    Auto,
    At(PathBuf),
    Skip,
}

/// Resolves one named executable using the lookup order described above.
#[derive(Debug, Clone)]
pub struct BinaryResolver {
    name: String,
    hint: String,
    search_path: SearchPath,
    install_dir: Dir,
    cwd: Dir,
}

impl BinaryResolver {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let hint = format!(
            "Install {name} on the system PATH or place the {name} binary next to the server executable."
        );
        Self {
            name,
            hint,
            search_path: SearchPath::Env,
            install_dir: Dir::Auto,
            cwd: Dir::Auto,
        }
    }

    /// Resolver for the transcoder used by the extractor.
    pub fn ffmpeg() -> Self {
        Self::new(FFMPEG)
    }

    /// Resolver for the extractor itself.
    pub fn yt_dlp() -> Self {
        Self::new(YT_DLP).with_hint(
            "Install yt-dlp (e.g. `pip install yt-dlp`) or place the yt-dlp binary next to the server executable.",
        )
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    /// Search these directories (platform `PATH` syntax) instead of `$PATH`.
    /// An empty value disables the search-path step.
    pub fn with_search_path(mut self, paths: impl Into<OsString>) -> Self {
        self.search_path = SearchPath::Custom(paths.into());
        self
    }

    pub fn with_install_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.install_dir = Dir::At(dir.as_ref().to_path_buf());
        self
    }

    pub fn without_install_dir(mut self) -> Self {
        self.install_dir = Dir::Skip;
        self
    }

    pub fn with_cwd<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cwd = Dir::At(dir.as_ref().to_path_buf());
        self
    }

    pub fn without_cwd(mut self) -> Self {
        self.cwd = Dir::Skip;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve the executable, or fail with [`ConvertError::MissingDependency`].
    pub fn resolve(&self) -> Result<PathBuf, ConvertError> {
        if let Some(path) = self.on_search_path() {
            debug!(binary = %self.name, path = %path.display(), "resolved on search path");
            return Ok(path);
        }

        for (location, dir) in [("install dir", self.install_dir()), ("cwd", self.cwd())] {
            let Some(dir) = dir else { continue };
            if let Some(path) = find_in_dir(&dir, &self.name) {
                debug!(binary = %self.name, location, path = %path.display(), "resolved");
                return Ok(path);
            }
        }

        Err(ConvertError::MissingDependency {
            binary: self.name.clone(),
            hint: self.hint.clone(),
        })
    }

    fn on_search_path(&self) -> Option<PathBuf> {
        match &self.search_path {
            SearchPath::Env => which::which(&self.name).ok(),
            SearchPath::Custom(paths) if paths.is_empty() => None,
            SearchPath::Custom(paths) => {
                let cwd = self.cwd().unwrap_or_else(|| PathBuf::from("."));
                which::which_in(&self.name, Some(paths), cwd).ok()
            }
        }
    }

    fn install_dir(&self) -> Option<PathBuf> {
        match &self.install_dir {
            Dir::Auto => std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
            Dir::At(dir) => Some(dir.clone()),
            Dir::Skip => None,
        }
    }

    fn cwd(&self) -> Option<PathBuf> {
        match &self.cwd {
            Dir::Auto => std::env::current_dir().ok(),
            Dir::At(dir) => Some(dir.clone()),
            Dir::Skip => None,
        }
    }
}

fn candidate_names(name: &str) -> Vec<String> {
    if cfg!(windows) {
        vec![format!("{name}.exe"), name.to_owned()]
    } else {
        vec![name.to_owned()]
    }
}

fn find_in_dir(dir: &Path, name: &str) -> Option<PathBuf> {
    candidate_names(name)
        .into_iter()
        .map(|candidate| dir.join(candidate))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// Download a static ffmpeg build next to the running executable, which is
/// lookup location 2 of [`BinaryResolver`].
pub async fn download_ffmpeg() -> Result<PathBuf, ConvertError> {
    let missing = |reason: String| ConvertError::MissingDependency {
        binary: FFMPEG.to_owned(),
        hint: format!("automatic download failed: {reason}"),
    };

    info!("downloading ffmpeg build next to the server executable");
    task::spawn_blocking(|| -> Result<PathBuf, String> {
        ffmpeg_sidecar::download::auto_download().map_err(|e| e.to_string())?;
        ffmpeg_sidecar::paths::sidecar_dir().map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| missing(e.to_string()))?
    .map_err(missing)
    .and_then(|dir| {
        find_in_dir(&dir, FFMPEG)
            .ok_or_else(|| missing(format!("no ffmpeg binary in {}", dir.display())))
    })
}
