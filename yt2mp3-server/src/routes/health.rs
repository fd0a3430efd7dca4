//! Health / heartbeat endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_health))]
pub struct HealthApi;

/// Register health-check routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

/// Heartbeat endpoint.
///
/// Always HTTP 200. `ffmpeg` is the resolved transcoder path, or `null` when
/// conversions would currently fail with a missing dependency.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is up", body = Value)
    )
)]
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let ffmpeg = state
        .converter
        .ffmpeg()
        .resolve()
        .ok()
        .map(|p| p.display().to_string());

    Json(json!({
        "status":      "ok",
        "version":     env!("CARGO_PKG_VERSION"),
        "ffmpeg":      ffmpeg,
        "slot_policy": state.converter.policy().to_string(),
    }))
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use yt2mp3_core::{BinaryResolver, ConversionService, SlotPolicy};

    fn state(policy: SlotPolicy) -> Arc<AppState> {
        let converter = ConversionService::new("upload")
            .with_policy(policy)
            .with_ffmpeg(
                BinaryResolver::ffmpeg()
                    .with_search_path("")
                    .without_install_dir()
                    .without_cwd(),
            );
        Arc::new(AppState::new(Config::default(), converter))
    }

    #[tokio::test]
    async fn health_response_has_ok_status() {
        let Json(body) = get_health(State(state(SlotPolicy::Fixed))).await;
        assert_eq!(body["status"], "ok");
        assert!(!body["version"].as_str().unwrap_or("").is_empty());
    }

    #[tokio::test]
    async fn health_reports_missing_ffmpeg_and_policy() {
        let Json(body) = get_health(State(state(SlotPolicy::AutoIncrement))).await;
        assert!(body["ffmpeg"].is_null());
        assert_eq!(body["slot_policy"], "increment");
    }
}
