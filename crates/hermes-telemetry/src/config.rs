//! Telemetry configuration.

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;
use hermes_config::TelemetryConfigSection;

/// Configuration for all telemetry subsystems.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to startup logs.
    pub service_name: String,

    /// Deployment environment.
    pub environment: String,

    /// Metrics configuration.
    pub metrics: MetricsConfig,

    /// Logging configuration.
    pub logging: LogConfig,
}

impl TelemetryConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::new()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::from(&TelemetryConfigSection::default())
    }
}

impl From<&TelemetryConfigSection> for TelemetryConfig {
    fn from(section: &TelemetryConfigSection) -> Self {
        Self {
            service_name: section.service_name.clone(),
            environment: section.environment.clone(),
            metrics: MetricsConfig::from(&section.metrics),
            logging: LogConfig::from(&section.logging),
        }
    }
}

/// Builder for [`TelemetryConfig`].
#[derive(Debug, Default)]
pub struct TelemetryConfigBuilder {
    service_name: Option<String>,
    environment: Option<String>,
    metrics: Option<MetricsConfig>,
    logging: Option<LogConfig>,
}

impl TelemetryConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service name.
    #[must_use]
    pub fn service_name(mut self, name: &str) -> Self {
        self.service_name = Some(name.to_string());
        self
    }

    /// Sets the environment.
    #[must_use]
    pub fn environment(mut self, env: &str) -> Self {
        self.environment = Some(env.to_string());
        self
    }

    /// Sets the metrics configuration.
    #[must_use]
    pub fn metrics(mut self, config: MetricsConfig) -> Self {
        self.metrics = Some(config);
        self
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn logging(mut self, config: LogConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// Sets the scrape address and enables metrics.
    #[must_use]
    pub fn metrics_addr(mut self, addr: &str) -> Self {
        let config = self.metrics.take().unwrap_or_default();
        self.metrics = Some(MetricsConfig {
            enabled: true,
            addr: addr.to_string(),
            ..config
        });
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        let defaults = TelemetryConfig::default();
        TelemetryConfig {
            service_name: self.service_name.unwrap_or(defaults.service_name),
            environment: self.environment.unwrap_or(defaults.environment),
            metrics: self.metrics.unwrap_or(defaults.metrics),
            logging: self.logging.unwrap_or(defaults.logging),
        }
    }
}
