//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a JSON body with an
//! appropriate status code.
//!
//! Conversion failures are logged with their full diagnostic text (including
//! extractor stderr); the client only gets the one-line summary plus a hint
//! to check the server log.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};
use yt2mp3_core::ConvertError;

use crate::schemas::convert::ErrorResponse;

/// Shown next to 500 responses.
pub const LOG_HINT: &str = "see the server log for the full error details";

#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the conversion core.
    #[error("conversion error: {0}")]
    Convert(#[from] ConvertError),

    /// The caller referenced a file that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The conversion slots are all taken.
    #[error("busy: {0}")]
    Busy(String),

    /// The conversion did not finish within the configured limit.
    #[error("timeout: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message, hint) = match &self {
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone(), None),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone(), None),
            ServerError::Busy(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone(), None),
            ServerError::Timeout(m) => {
                warn!(message = %m, "conversion timed out");
                (StatusCode::GATEWAY_TIMEOUT, m.clone(), None)
            }
            ServerError::Convert(ConvertError::InvalidRequest(m)) => {
                (StatusCode::BAD_REQUEST, m.clone(), None)
            }
            // Internal errors: log the full detail, return the short form.
            ServerError::Convert(e) => {
                error!(error = %e.detail(), "conversion failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), Some(LOG_HINT))
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                    Some(LOG_HINT),
                )
            }
        };
        let body = ErrorResponse {
            error: message,
            hint: hint.map(str::to_owned),
        };
        (status, Json(body)).into_response()
    }
}
