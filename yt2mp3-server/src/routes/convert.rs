//! URL → MP3 conversion endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Json, Router};
use tracing::{debug, info};
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::convert::{ConvertRequest, ConvertResponse, ErrorResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(convert),
    components(schemas(ConvertRequest, ConvertResponse, ErrorResponse)),
)]
pub struct ConvertApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/convert", post(convert))
        // Legacy path still requested by the web player.
        .route("/api/download", post(convert))
}

/// Download a video's audio track and store it as MP3.
///
/// Blocks until the extractor has finished. One conversion runs at a time;
/// further requests are turned away with `503` rather than queued.
#[utoipa::path(
    post,
    path = "/convert",
    tag = "convert",
    request_body = ConvertRequest,
    responses(
        (status = 200, description = "Audio stored", body = ConvertResponse),
        (status = 400, description = "No URL provided", body = ErrorResponse),
        (status = 500, description = "Conversion failed", body = ErrorResponse),
        (status = 503, description = "Another conversion is running", body = ErrorResponse),
        (status = 504, description = "Conversion timed out", body = ErrorResponse),
    )
)]
pub async fn convert(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ConvertRequest>, JsonRejection>,
) -> Result<Json<ConvertResponse>, ServerError> {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            debug!(error = %rejection, "unreadable convert body");
            ConvertRequest::default()
        }
    };

    let url = req
        .source_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ServerError::BadRequest("no url provided".into()))?;

    let _permit = Arc::clone(&state.conversions)
        .try_acquire_owned()
        .map_err(|_| {
            ServerError::Busy("another conversion is in progress; try again shortly".into())
        })?;

    let timeout = state.config.convert_timeout;
    let stored = tokio::time::timeout(timeout, state.converter.convert(url))
        .await
        .map_err(|_| {
            ServerError::Timeout(format!(
                "conversion did not finish within {}s",
                timeout.as_secs()
            ))
        })??;

    info!(url = %url, file = %stored.file_name, "conversion complete");
    Ok(Json(ConvertResponse {
        file: format!("/files/{}", stored.file_name),
    }))
}
