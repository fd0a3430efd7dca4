use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::routes::{convert, files, health};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(info(
    title = "yt2mp3-server",
    description = "Convert video URLs to MP3 and serve the results",
    version = "0.1.0",
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(convert::ConvertApi::openapi());
    root.merge(files::FilesApi::openapi());
    root.merge(health::HealthApi::openapi());
    root
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(get_docs()) }),
    )
}
