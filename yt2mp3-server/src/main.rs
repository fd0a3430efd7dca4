//! yt2mp3-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables and CLI flags.
//! 2. Initialise structured tracing (JSON or pretty, stdout or rolling file).
//! 3. Ensure the upload directory exists and locate ffmpeg (optionally
//!    downloading it).
//! 4. Build the conversion service and shared state.
//! 5. Build the Axum router and start the HTTP server with graceful shutdown.

mod config;
mod error;
mod middleware;
mod routes;
mod schemas;
mod state;

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use yt2mp3_core::{BinaryResolver, ConversionService};

use crate::config::{Cli, Config};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env().with_cli(Cli::parse());

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let _log_guard = init_tracing(&cfg);
    info!(version = env!("CARGO_PKG_VERSION"), "yt2mp3-server starting");
    info!(config = ?cfg, "configuration loaded");

    if cfg.cookies.is_none() {
        warn!("YOUTUBE_COOKIES not set; sources that require sign-in will fail");
    }

    // ── 3. Filesystem and external tools ───────────────────────────────────────
    tokio::fs::create_dir_all(&cfg.upload_dir).await?;
    info!(upload_dir = %cfg.upload_dir.display(), "upload directory ready");

    match BinaryResolver::ffmpeg().resolve() {
        Ok(path) => info!(ffmpeg = %path.display(), "ffmpeg found"),
        Err(e) if cfg.auto_download_ffmpeg => {
            warn!(error = %e, "ffmpeg not found; downloading");
            match yt2mp3_core::download_ffmpeg().await {
                Ok(path) => info!(ffmpeg = %path.display(), "ffmpeg installed"),
                Err(e) => warn!(error = %e, "ffmpeg download failed; conversions will fail"),
            }
        }
        Err(e) => warn!(error = %e, "ffmpeg not found; conversions will fail until it is installed"),
    }

    // ── 4. Shared application state ────────────────────────────────────────────
    let converter = ConversionService::new(&cfg.upload_dir)
        .with_policy(cfg.slot_policy)
        .with_audio_quality(cfg.audio_quality)
        .with_cookies(cfg.cookies.clone());
    let bind_address = cfg.bind_address();
    let state = Arc::new(AppState::new(cfg, converter));

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(state);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("yt2mp3-server stopped");
    Ok(())
}

/// Install the global subscriber. The returned guard flushes the file
/// writer and must live until shutdown.
fn init_tracing(cfg: &Config) -> Option<WorkerGuard> {
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: YT2MP3_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let (writer, guard) = match &cfg.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "yt2mp3-server.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_ansi(cfg.log_dir.is_none())
        .with_writer(writer);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    guard
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => { s.recv().await; }
            Err(e)    => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c   => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
