//! Top-level gateway configuration.

use serde::{Deserialize, Serialize};

use crate::{CoprocessConfig, LogFormat, TelemetryConfigSection};

/// Complete gateway configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and the
/// environment.
///
/// # Example
///
/// ```
/// use hermes_config::GatewayConfig;
///
/// let config = GatewayConfig::default();
/// assert_eq!(config.coprocess.max_message_size, 100_000_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Out-of-process middleware settings.
    #[serde(default)]
    pub coprocess: CoprocessConfig,

    /// Telemetry configuration (metrics, logging).
    #[serde(default)]
    pub telemetry: TelemetryConfigSection,
}

impl GatewayConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a limit is zero, the hook timeout exceeds the
    /// request budget, the HTTP endpoint is not an http(s) URL, or the metrics
    /// address does not parse.
    pub fn validate(&self) -> Result<(), crate::ConfigError> {
        let coprocess = &self.coprocess;

        if coprocess.max_message_size == 0 {
            return Err(crate::ConfigError::invalid_value(
                "coprocess.max_message_size",
                "must be greater than zero",
            ));
        }
        if coprocess.hook_timeout_ms == 0 || coprocess.request_timeout_ms == 0 {
            return Err(crate::ConfigError::invalid_value(
                "coprocess.hook_timeout_ms",
                "timeouts must be greater than zero",
            ));
        }
        if coprocess.hook_timeout_ms > coprocess.request_timeout_ms {
            return Err(crate::ConfigError::invalid_value(
                "coprocess.hook_timeout_ms",
                format!(
                    "{} exceeds request_timeout_ms {}",
                    coprocess.hook_timeout_ms, coprocess.request_timeout_ms
                ),
            ));
        }
        if let Some(endpoint) = &coprocess.http.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(crate::ConfigError::invalid_value(
                    "coprocess.http.endpoint",
                    format!("expected an http(s) URL, got '{endpoint}'"),
                ));
            }
        }

        if self.telemetry.metrics.enabled
            && self
                .telemetry
                .metrics
                .addr
                .parse::<std::net::SocketAddr>()
                .is_err()
        {
            return Err(crate::ConfigError::invalid_value(
                "telemetry.metrics.addr",
                format!("invalid socket address: {}", self.telemetry.metrics.addr),
            ));
        }

        Ok(())
    }

    /// Local development preset: pretty debug logs, metrics off.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.ansi_enabled = true;
        config.telemetry.logging.include_location = true;
        config.telemetry.metrics.enabled = false;
        config.telemetry.environment = "development".to_string();
        config
    }

    /// Production preset: JSON info logs, metrics on.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.logging.ansi_enabled = false;
        config.telemetry.metrics.enabled = true;
        config.telemetry.environment = "production".to_string();
        config
    }
}

/// Builder for [`GatewayConfig`].
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    coprocess: Option<CoprocessConfig>,
    telemetry: Option<TelemetryConfigSection>,
}

impl GatewayConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the coprocess configuration.
    #[must_use]
    pub fn coprocess(mut self, coprocess: CoprocessConfig) -> Self {
        self.coprocess = Some(coprocess);
        self
    }

    /// Set the telemetry configuration.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryConfigSection) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Build the configuration; unset sections use defaults.
    #[must_use]
    pub fn build(self) -> GatewayConfig {
        GatewayConfig {
            coprocess: self.coprocess.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<GatewayConfig, crate::ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
