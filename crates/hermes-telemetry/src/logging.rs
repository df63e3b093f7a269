//! Structured logging.
//!
//! Installs a `tracing-subscriber` registry with either a JSON layer
//! (production) or a pretty layer (development), filtered by an `EnvFilter`
//! directive such as `info,hermes_coprocess=debug`.
//!
//! # Example
//!
//! ```rust,ignore
//! use hermes_telemetry::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::production())?;
//! tracing::info!(api_id = "orders", stage = "pre", "hook chain finished");
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use hermes_config::{LogFormat, LoggingConfig};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Filter directive (e.g. "info", "hermes_coprocess=debug").
    pub level: String,

    /// Whether to output JSON format.
    pub json_format: bool,

    /// Whether to emit span open/close events.
    pub span_events: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to colorize pretty output.
    pub ansi: bool,

    /// Whether to include the target (module path).
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            span_events: false,
            file_line_info: false,
            ansi: false,
            include_target: true,
        }
    }
}

impl LogConfig {
    /// Human-readable debug output.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            json_format: false,
            span_events: true,
            file_line_info: true,
            ansi: true,
            ..Self::default()
        }
    }

    /// JSON output at info.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }
}

impl From<&LoggingConfig> for LogConfig {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            enabled: config.enabled,
            level: config.level.clone(),
            json_format: config.format == LogFormat::Json,
            span_events: false,
            file_line_info: config.include_location,
            ansi: config.ansi_enabled,
            include_target: true,
        }
    }
}

/// Initializes the global logging subscriber.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the filter is invalid or a global
/// subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = if config.json_format {
        tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(config.ansi)
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Creates an env filter from a directive string.
///
/// # Errors
///
/// Returns error if the directive is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level: {e}")))
}

/// Standard log field names.
pub mod fields {
    /// Request ID.
    pub const REQUEST_ID: &str = "request_id";

    /// API definition id.
    pub const API_ID: &str = "api_id";

    /// Hook stage.
    pub const STAGE: &str = "stage";

    /// Hook name.
    pub const HOOK: &str = "hook";

    /// Session key prefix (never the full key).
    pub const SESSION: &str = "session";

    /// Duration in milliseconds.
    pub const DURATION_MS: &str = "duration_ms";

    /// Error.
    pub const ERROR: &str = "error";
}

/// Shortens a session key for logging.
///
/// Keys are credentials; logs only ever carry the first few characters.
#[must_use]
pub fn redact_key(key: &str) -> String {
    let prefix: String = key.chars().take(6).collect();
    if prefix.len() < key.len() {
        format!("{prefix}…")
    } else {
        prefix
    }
}
