use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

/// Session cookies written out for one extractor run.
///
/// The file lives in the system temp directory, never in the served output
/// directory, and is deleted when the jar is dropped.
pub struct CookieJar {
    file: NamedTempFile,
}

impl CookieJar {
    /// Persist raw Netscape cookie text to a fresh temporary file.
    pub fn write(contents: &str) -> io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("yt2mp3-cookies-")
            .suffix(".txt")
            .tempfile()?;
        file.write_all(contents.as_bytes())?;
        file.flush()?;
        debug!(path = %file.path().display(), "cookie jar written");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl std::fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CookieJar({})", self.path().display())
    }
}
