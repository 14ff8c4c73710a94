//! Process-level request defaults.
//!
//! Values are loaded from `REQFLOW_*` environment variables or from a TOML
//! document. Invalid environment values fall back to defaults without
//! failing; a `0` duration for an optional setting means "disabled".
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `REQFLOW_RETRY_COUNT` | 0 | Retries after the first attempt |
//! | `REQFLOW_RETRY_INTERVAL_MS` | 1000 | Base retry delay |
//! | `REQFLOW_RETRY_EXPONENTIAL` | false | Double the delay after each retry |
//! | `REQFLOW_CACHE_TIME_MS` | 0 | Hard cache TTL (0 = no expiry) |
//! | `REQFLOW_STALE_TIME_MS` | 0 | Soft cache TTL (0 = never stale) |
//! | `REQFLOW_LOADING_DELAY_MS` | 0 | Loading indicator delay (0 = none) |
//! | `REQFLOW_FOCUS_TIMESPAN_MS` | 5000 | Min spacing of focus refreshes |
//! | `REQFLOW_POLLING_RETRY_INTERVAL_MS` | 0 | Resume delay after a polling error |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from parsing or rendering [`RequestDefaults`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Defaults applied to every orchestrator built with
/// [`RequestOptions::from_defaults`](crate::request::RequestOptions::from_defaults).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestDefaults {
    pub retry_count: u32,
    pub retry_interval_ms: u64,
    pub retry_exponential: bool,
    pub cache_time_ms: Option<u64>,
    pub stale_time_ms: Option<u64>,
    pub loading_delay_ms: Option<u64>,
    pub focus_timespan_ms: u64,
    pub polling_retry_interval_ms: Option<u64>,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            retry_count: 0,
            retry_interval_ms: 1000,
            retry_exponential: false,
            cache_time_ms: None,
            stale_time_ms: None,
            loading_delay_ms: None,
            focus_timespan_ms: 5000,
            polling_retry_interval_ms: None,
        }
    }
}

impl RequestDefaults {
    /// Parse defaults from TOML. Missing fields keep their default.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Effective values as pretty JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn cache_time(&self) -> Option<Duration> {
        nonzero_ms(self.cache_time_ms)
    }

    pub fn stale_time(&self) -> Option<Duration> {
        nonzero_ms(self.stale_time_ms)
    }

    pub fn loading_delay(&self) -> Option<Duration> {
        nonzero_ms(self.loading_delay_ms)
    }

    pub fn focus_timespan(&self) -> Duration {
        Duration::from_millis(self.focus_timespan_ms)
    }

    pub fn polling_retry_interval(&self) -> Option<Duration> {
        nonzero_ms(self.polling_retry_interval_ms)
    }
}

fn nonzero_ms(ms: Option<u64>) -> Option<Duration> {
    ms.filter(|ms| *ms > 0).map(Duration::from_millis)
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse an optional millisecond env var; missing, invalid or `0` is `None`.
fn parse_opt_ms(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
}

fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Load defaults from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> RequestDefaults {
    let base = RequestDefaults::default();
    let retry_interval_ms = parse_u64("REQFLOW_RETRY_INTERVAL_MS", base.retry_interval_ms);
    let focus_timespan_ms = parse_u64("REQFLOW_FOCUS_TIMESPAN_MS", base.focus_timespan_ms);

    RequestDefaults {
        retry_count: parse_u32("REQFLOW_RETRY_COUNT", base.retry_count).min(100),
        retry_interval_ms: retry_interval_ms.max(1),
        retry_exponential: parse_bool("REQFLOW_RETRY_EXPONENTIAL", base.retry_exponential),
        cache_time_ms: parse_opt_ms("REQFLOW_CACHE_TIME_MS"),
        stale_time_ms: parse_opt_ms("REQFLOW_STALE_TIME_MS"),
        loading_delay_ms: parse_opt_ms("REQFLOW_LOADING_DELAY_MS"),
        focus_timespan_ms,
        polling_retry_interval_ms: parse_opt_ms("REQFLOW_POLLING_RETRY_INTERVAL_MS"),
    }
}
