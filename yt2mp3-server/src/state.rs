//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::warn;
use yt2mp3_core::ConversionService;

use crate::config::Config;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// URL → stored MP3.
    pub converter: Arc<ConversionService>,
    /// One permit per conversion allowed to run at once.
    pub conversions: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: Config, converter: ConversionService) -> Self {
        let permits = conversion_permits(config.max_concurrent);
        Self {
            config: Arc::new(config),
            converter: Arc::new(converter),
            conversions: Arc::new(Semaphore::new(permits)),
        }
    }
}

/// Every conversion writes the same `temp.*` scratch files in the upload
/// directory, so only one may run at a time whatever was configured.
fn conversion_permits(requested: usize) -> usize {
    if requested > 1 {
        warn!(
            requested,
            "YT2MP3_MAX_CONCURRENT above 1 is not supported; running one conversion at a time"
        );
    }
    1
}

#[cfg(test)]
mod test {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn concurrency_is_clamped_to_one() {
        let config = Config {
            max_concurrent: 4,
            ..Config::default()
        };
        let state = AppState::new(config, ConversionService::new("upload"));
        assert_eq!(state.conversions.available_permits(), 1);
        assert!(logs_contain("running one conversion at a time"));
    }

    #[test]
    fn default_allows_a_single_conversion() {
        let state = AppState::new(Config::default(), ConversionService::new("upload"));
        assert_eq!(state.conversions.available_permits(), 1);
    }
}
