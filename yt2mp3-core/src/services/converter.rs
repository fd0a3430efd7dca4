//! URL in, stored MP3 out.
//!
//! [`ConversionService::convert`] owns the whole file lifecycle around one
//! extractor run:
//!
//! 1. reject blank URLs before touching the disk,
//! 2. resolve ffmpeg and check the extractor can run,
//! 3. create the output directory and pick the slot for the active
//!    [`SlotPolicy`],
//! 4. run the extractor against `temp.%(ext)s`,
//! 5. move `temp.mp3` into the slot and check it landed. The slot's previous
//!    occupant is only displaced here, once new audio exists.
//!
//! Scratch files (cookie jar, `temp.*`) are guards released on every exit
//! path, including cancellation of the future.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task;
use tracing::{debug, info, warn};

use crate::error::ConvertError;
use crate::services::binary::BinaryResolver;
use crate::services::cookies::CookieJar;
use crate::services::extractor::{ExtractJob, Extractor, YtDlpExtractor};
use crate::services::slot::{self, AUDIO_EXT, FIXED_SLOT, OutputSlot, SlotPolicy};

/// File stem the extractor writes to before the output is moved into place.
pub const TEMP_STEM: &str = "temp";

/// Default MP3 bitrate in kbps.
pub const DEFAULT_AUDIO_QUALITY: u32 = 192;

/// A finished conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAudio {
    pub path: PathBuf,
    pub file_name: String,
}

pub struct ConversionService {
    output_dir: PathBuf,
    policy: SlotPolicy,
    audio_quality: u32,
    ffmpeg: BinaryResolver,
    cookies: Option<String>,
    extractor: Arc<dyn Extractor>,
}

impl std::fmt::Debug for ConversionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionService")
            .field("output_dir", &self.output_dir)
            .field("policy", &self.policy)
            .field("audio_quality", &self.audio_quality)
            .field("ffmpeg", &self.ffmpeg)
            .field("cookies", &self.cookies.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl ConversionService {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            policy: SlotPolicy::default(),
            audio_quality: DEFAULT_AUDIO_QUALITY,
            ffmpeg: BinaryResolver::ffmpeg(),
            cookies: None,
            extractor: Arc::new(YtDlpExtractor::new()),
        }
    }

    pub fn with_policy(mut self, policy: SlotPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_audio_quality(mut self, kbps: u32) -> Self {
        self.audio_quality = kbps;
        self
    }

    pub fn with_ffmpeg(mut self, resolver: BinaryResolver) -> Self {
        self.ffmpeg = resolver;
        self
    }

    /// Raw Netscape cookie text handed to the extractor on every run.
    pub fn with_cookies(mut self, cookies: Option<String>) -> Self {
        self.cookies = cookies.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn policy(&self) -> SlotPolicy {
        self.policy
    }

    pub fn ffmpeg(&self) -> &BinaryResolver {
        &self.ffmpeg
    }

    /// Where the extractor must leave its MP3.
    pub fn temp_output(&self) -> PathBuf {
        self.output_dir.join(format!("{TEMP_STEM}.{AUDIO_EXT}"))
    }

    pub async fn convert(&self, source_url: &str) -> Result<StoredAudio, ConvertError> {
        let url = source_url.trim();
        if url.is_empty() {
            return Err(ConvertError::InvalidRequest("no url provided".into()));
        }

        let ffmpeg = self.ffmpeg.resolve()?;
        debug!(ffmpeg = %ffmpeg.display(), "using ffmpeg");
        self.extractor.check()?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| ConvertError::persist(&self.output_dir, e))?;

        let scratch = TempOutput::new(&self.output_dir);
        scratch.sweep().await;
        let result = self.extract_and_store(url, &ffmpeg).await;
        scratch.release().await;
        result
    }

    /// Everything between the scratch sweeps. The slot is only written by
    /// the final persist, so a failure here leaves existing output alone.
    async fn extract_and_store(&self, url: &str, ffmpeg: &Path) -> Result<StoredAudio, ConvertError> {
        let slot = self.next_slot().await?;
        let final_path = slot.path_in(&self.output_dir);
        info!(url = %url, target = %final_path.display(), policy = %self.policy, "converting");

        let cookie_jar = self.cookie_jar().await;
        let template = self.output_dir.join(format!("{TEMP_STEM}.%(ext)s"));
        self.extractor
            .extract(ExtractJob {
                url,
                output_template: &template,
                ffmpeg,
                cookie_file: cookie_jar.as_ref().map(CookieJar::path),
                audio_quality: self.audio_quality,
            })
            .await?;
        drop(cookie_jar);

        let temp_path = self.temp_output();
        if !tokio::fs::try_exists(&temp_path).await.unwrap_or(false) {
            return Err(ConvertError::ConversionIncomplete {
                expected: temp_path,
            });
        }

        let (from, to) = (temp_path.clone(), final_path.clone());
        blocking(move || slot::persist(&from, &to))
            .await
            .map_err(|e| ConvertError::persist(&final_path, e))??;

        if !tokio::fs::try_exists(&final_path).await.unwrap_or(false) {
            return Err(ConvertError::persist(&final_path, "file missing after move"));
        }

        info!(path = %final_path.display(), "conversion stored");
        Ok(StoredAudio {
            file_name: slot.file_name(),
            path: final_path,
        })
    }

    async fn next_slot(&self) -> Result<OutputSlot, ConvertError> {
        match self.policy {
            SlotPolicy::Fixed => Ok(OutputSlot(FIXED_SLOT)),
            SlotPolicy::AutoIncrement => {
                let dir = self.output_dir.clone();
                blocking(move || slot::next_numeric_slot(&dir))
                    .await
                    .map_err(|e| ConvertError::persist(&self.output_dir, e))?
                    .map_err(|e| ConvertError::persist(&self.output_dir, e))
            }
        }
    }

    async fn cookie_jar(&self) -> Option<CookieJar> {
        let cookies = self.cookies.clone()?;
        match blocking(move || CookieJar::write(&cookies)).await {
            Ok(Ok(jar)) => Some(jar),
            Ok(Err(e)) => {
                warn!(error = %e, "could not write cookie jar; continuing without cookies");
                None
            }
            Err(e) => {
                warn!(error = %e, "cookie jar task failed; continuing without cookies");
                None
            }
        }
    }
}

/// Removes the extractor's scratch files (`temp.*`, including partial
/// downloads). [`TempOutput::release`] does it off the runtime; if the
/// conversion future is dropped first, `Drop` does it inline.
struct TempOutput {
    dir: PathBuf,
    armed: bool,
}

impl TempOutput {
    fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            armed: true,
        }
    }

    async fn sweep(&self) {
        let dir = self.dir.clone();
        if let Err(e) = blocking(move || sweep_scratch(&dir)).await {
            warn!(error = %e, "scratch cleanup task failed");
        }
    }

    async fn release(mut self) {
        self.sweep().await;
        self.armed = false;
    }
}

impl Drop for TempOutput {
    fn drop(&mut self) {
        if self.armed {
            sweep_scratch(&self.dir);
        }
    }
}

/// Run blocking filesystem work off the runtime, inside the caller's span.
async fn blocking<T, F>(f: F) -> Result<T, task::JoinError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let span = tracing::Span::current();
    task::spawn_blocking(move || span.in_scope(f)).await
}

fn sweep_scratch(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let prefix = format!("{TEMP_STEM}.");
    for entry in entries.flatten() {
        let name = entry.file_name();
        let is_scratch = name.to_str().is_some_and(|n| n.starts_with(&prefix));
        if !is_scratch {
            continue;
        }
        let path = entry.path();
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed scratch file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "could not remove scratch file"),
        }
    }
}
