//! Tracing subscriber setup for hosts that do not install their own.
//!
//! The library itself only emits `tracing` events; calling [`init_logging`]
//! is optional.

use std::path::PathBuf;

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable consulted when [`LogConfig::level`] is empty.
pub const LOG_ENV: &str = "REQFLOW_LOG";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line human-readable output.
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Filter directive, e.g. `"info"` or `"reqflow_core=debug"`.
    pub level: String,
    /// Write to this file instead of stderr.
    pub output_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
            output_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
    #[error("Failed to open log file: {0}")]
    FileOpen(String),
    #[error("Subscriber already initialized")]
    AlreadyInitialized,
}

/// Resolve the filter for `config`, falling back to `REQFLOW_LOG`, then `info`.
pub fn build_filter(config: &LogConfig) -> Result<EnvFilter, LogError> {
    let directive = if config.level.trim().is_empty() {
        std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string())
    } else {
        config.level.clone()
    };
    EnvFilter::try_new(&directive).map_err(|e| LogError::InvalidFilter(e.to_string()))
}

/// Install a global subscriber. Call once at startup.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    match (&config.output_path, config.format) {
        (Some(path), format) => {
            let file = std::fs::File::create(path).map_err(|e| LogError::FileOpen(e.to_string()))?;
            let writer = std::sync::Mutex::new(file);
            match format {
                LogFormat::Json => registry.with(fmt::layer().json().with_writer(writer)).try_init(),
                LogFormat::Pretty => registry
                    .with(fmt::layer().pretty().with_ansi(false).with_writer(writer))
                    .try_init(),
                LogFormat::Compact => registry
                    .with(fmt::layer().compact().with_ansi(false).with_writer(writer))
                    .try_init(),
            }
        }
        (None, LogFormat::Json) => registry.with(fmt::layer().json()).try_init(),
        (None, LogFormat::Pretty) => registry.with(fmt::layer().pretty()).try_init(),
        (None, LogFormat::Compact) => registry.with(fmt::layer().compact()).try_init(),
    }
    .map_err(|_| LogError::AlreadyInitialized)
}
