//! Gateway configuration sections.

use serde::{Deserialize, Serialize};

/// Out-of-process middleware settings shared by every API.
///
/// # Example
///
/// ```
/// use hermes_config::CoprocessConfig;
///
/// let config = CoprocessConfig::default();
/// assert_eq!(config.max_message_size, 100_000_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CoprocessConfig {
    /// Largest payload, in bytes, that may cross the hook transport in either direction.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Upper bound for a single hook call in milliseconds.
    #[serde(default = "default_hook_timeout")]
    pub hook_timeout_ms: u64,

    /// Budget for the whole request pipeline in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// HTTP driver settings.
    #[serde(default)]
    pub http: HttpDriverConfig,
}

impl Default for CoprocessConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            hook_timeout_ms: default_hook_timeout(),
            request_timeout_ms: default_request_timeout(),
            http: HttpDriverConfig::default(),
        }
    }
}

fn default_max_message_size() -> usize {
    100_000_000
}

fn default_hook_timeout() -> u64 {
    10_000
}

fn default_request_timeout() -> u64 {
    30_000
}

/// Settings for the HTTP hook driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HttpDriverConfig {
    /// Dispatch endpoint every hook call is POSTed to (e.g. `http://127.0.0.1:5555/dispatch`).
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Connection establishment timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Idle connections kept per host.
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpDriverConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            connect_timeout_ms: default_connect_timeout(),
            pool_max_idle_per_host: default_pool_max_idle(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    2_000
}

fn default_pool_max_idle() -> usize {
    100
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Enable metrics collection and export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus scrape endpoint address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,

    /// Histogram bucket boundaries for hook durations, in seconds.
    #[serde(default = "default_histogram_buckets")]
    pub histogram_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: default_metrics_addr(),
            histogram_buckets: default_histogram_buckets(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_histogram_buckets() -> Vec<f64> {
    vec![
        0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
    ]
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level or filter directive (e.g. `info`, `hermes_coprocess=debug`).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include ANSI color codes in output.
    #[serde(default)]
    pub ansi_enabled: bool,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            ansi_enabled: false,
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Telemetry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfigSection {
    /// Service name attached to logs.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Deployment environment (e.g. "development", "production").
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfigSection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "hermes-gateway".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_true() -> bool {
    true
}
