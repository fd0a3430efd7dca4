use std::path::PathBuf;

use strum::Display;
use thiserror::Error;

/// Coarse reason an extractor run failed, derived from its diagnostic output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UpstreamKind {
    /// The media was removed, made private, or never existed.
    Unavailable,
    /// The source requires a signed-in session (cookies).
    AuthenticationRequired,
    /// The source refuses to serve the media in this region.
    GeoRestricted,
    /// No extractor understands the URL.
    UnsupportedUrl,
    /// DNS, TLS, timeouts or HTTP errors while talking to the source.
    Network,
    Other,
}

/// Errors produced by a single conversion call.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The request carried no usable source URL.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A required external binary could not be located.
    #[error("{binary} not found. {hint}")]
    MissingDependency { binary: String, hint: String },

    /// The extractor exited cleanly but left no output where it was told to.
    #[error("download finished but expected output not found at {}", .expected.display())]
    ConversionIncomplete { expected: PathBuf },

    /// The produced audio could not be moved into its final slot.
    #[error("failed to store audio at {}: {reason}", .path.display())]
    PersistFailure { path: PathBuf, reason: String },

    /// The extractor reported its own error.
    ///
    /// `summary` is the short line shown to callers, `detail` the full
    /// diagnostic output kept for the server log.
    #[error("extractor failed ({kind}): {summary}")]
    UpstreamFailure {
        kind: UpstreamKind,
        summary: String,
        detail: String,
    },
}

impl ConvertError {
    pub(crate) fn persist(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ConvertError::PersistFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Full diagnostic text for logs; identical to `Display` except for
    /// extractor failures, which carry the complete stderr.
    pub fn detail(&self) -> String {
        match self {
            ConvertError::UpstreamFailure { detail, .. } if !detail.is_empty() => {
                format!("{self}\n{detail}")
            }
            other => other.to_string(),
        }
    }
}
