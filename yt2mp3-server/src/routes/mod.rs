//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Conversion (`/convert`) and file serving (`/files`, `/default.mp3`)
//! - Health / heartbeat route
//! - Optional OpenAPI document (disable with `YT2MP3_ENABLE_DOCS=false`)

mod convert;
pub mod doc;
mod files;
mod health;

use axum::{middleware, Router};
use crate::middleware::{cors, trace};
use crate::state::AppState;
use std::sync::Arc;

// ── Router builder ────────────────────────────────────────────────────────────

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .merge(health::router())
        .merge(convert::router())
        .merge(files::router());

    if state.config.enable_docs {
        app = app.merge(doc::router());
    }

    app
        // Outermost layers execute first on the way in.
        .layer(cors::cors_layer(state.clone()))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
