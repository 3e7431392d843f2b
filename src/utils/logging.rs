//! Structured logging setup.
//!
//! The library itself only emits `tracing` events. Programs embedding it (the
//! bundled binary included) call [`init_logging`] once at start-up to install a
//! subscriber built from [`LoggingConfig`]:
//!
//! - console output, human-readable or JSON
//! - optional append-only log file, without ANSI colours
//! - filtering from `RUST_LOG` when set, otherwise from `log_level`

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

/// Filter directive derived from the configured level
pub fn default_filter(config: &LoggingConfig) -> String {
    config.log_level.to_string().to_lowercase()
}

/// Build the filter, preferring `RUST_LOG` over the configured level
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(config)))
}

/// Install the global tracing subscriber.
///
/// Fails if the log file cannot be opened or a subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.log_to_console {
        let layer = fmt::layer().with_target(true).with_level(true);
        layers.push(if config.json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        });
    }

    if config.log_to_file {
        if let Some(path) = &config.log_file_path {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| ProtocolError::ConfigError(format!("Failed to open log file: {e}")))?;
            let layer = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true);
            layers.push(if config.json_format {
                layer.json().boxed()
            } else {
                layer.boxed()
            });
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter(config))
        .try_init()
        .map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))
}
