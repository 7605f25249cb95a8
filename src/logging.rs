//! Tracing subscriber set-up for the binary.

use crate::config::ApplicationConfig;
use crate::error::{AppResult, MillError};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `config.log_level` applies. Fails if a
/// subscriber is already installed.
pub fn init(config: &ApplicationConfig) -> AppResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            MillError::Configuration(format!("invalid log level '{}': {e}", config.log_level))
        })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let result = if config.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| MillError::Configuration(format!("cannot install logger: {e}")))
}
