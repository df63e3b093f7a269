//! Observability for the Hermes gateway.
//!
//! - **Logging**: structured JSON or pretty logs through `tracing-subscriber`
//! - **Metrics**: Prometheus metrics through the `metrics` facade
//!
//! The dispatch crates only emit `tracing` events and `metrics` macros; this
//! crate installs the subscriber and recorder that receive them.
//!
//! # Example
//!
//! ```rust,ignore
//! use hermes_config::ConfigLoader;
//! use hermes_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = ConfigLoader::new().with_env_prefix("HERMES").load()?;
//! init_telemetry(&TelemetryConfig::from(&config.telemetry))?;
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, redact_key, LogConfig};
pub use metrics::{init_metrics, render_metrics, HookOutcome, InFlightGuard, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        "telemetry initialized"
    );
    Ok(())
}
