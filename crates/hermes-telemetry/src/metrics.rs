//! Prometheus metrics for hook dispatch.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `hermes_hook_invocations_total` | Counter | `stage`, `hook`, `outcome` | Hook calls by result |
//! | `hermes_hook_duration_seconds` | Histogram | `stage`, `hook` | Hook round-trip latency |
//! | `hermes_hook_payload_bytes` | Histogram | `stage` | Serialized envelope size |
//! | `hermes_hooks_in_flight` | Gauge | - | Hook calls awaiting a reply |
//! | `hermes_auth_decisions_total` | Counter | `mechanism`, `outcome` | Authentication results |
//! | `hermes_pipeline_aborts_total` | Counter | `stage`, `category` | Requests aborted by a stage |
//!
//! Recording functions go through the `metrics` facade and are no-ops until a
//! recorder is installed with [`init_metrics`].

use crate::error::TelemetryError;
use crate::TelemetryResult;
use hermes_core::{ErrorCategory, HookStage};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Scrape listener address (e.g. "0.0.0.0:9090").
    pub addr: String,

    /// Buckets for `_seconds` histograms.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        let section = hermes_config::MetricsConfig::default();
        Self::from(&section)
    }
}

impl From<&hermes_config::MetricsConfig> for MetricsConfig {
    fn from(config: &hermes_config::MetricsConfig) -> Self {
        Self {
            enabled: config.enabled,
            addr: config.addr.clone(),
            duration_buckets: config.histogram_buckets.clone(),
        }
    }
}

/// Outcome label for a hook invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// The hook replied with a well-formed envelope.
    Ok,
    /// The payload exceeded the size ceiling; no call was made.
    Oversize,
    /// Transport failure or remote error status.
    Error,
    /// The reply could not be decoded.
    Malformed,
    /// The deadline expired.
    Timeout,
}

impl HookOutcome {
    /// Label value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Oversize => "oversize",
            Self::Error => "error",
            Self::Malformed => "malformed",
            Self::Timeout => "timeout",
        }
    }
}

/// Installs the Prometheus recorder and scrape listener.
///
/// # Errors
///
/// Returns `TelemetryError` if the address does not parse or a recorder is
/// already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let handle = PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Suffix("_seconds".to_string()), &config.duration_buckets)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);
    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus format, or `None` before [`init_metrics`].
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// Registers descriptions for all metrics.
pub fn register_metric_descriptions() {
    describe_counter!(
        "hermes_hook_invocations_total",
        "Out-of-process hook invocations by stage, hook and outcome"
    );
    describe_histogram!(
        "hermes_hook_duration_seconds",
        "Hook round-trip duration in seconds"
    );
    describe_histogram!(
        "hermes_hook_payload_bytes",
        "Serialized envelope size sent to hooks"
    );
    describe_gauge!("hermes_hooks_in_flight", "Hook calls awaiting a reply");
    describe_counter!(
        "hermes_auth_decisions_total",
        "Authentication decisions by mechanism and outcome"
    );
    describe_counter!(
        "hermes_pipeline_aborts_total",
        "Requests aborted by a pipeline stage"
    );
}

/// Records one finished hook invocation.
pub fn record_hook_invocation(
    stage: HookStage,
    hook: &str,
    outcome: HookOutcome,
    duration: Duration,
) {
    counter!(
        "hermes_hook_invocations_total",
        "stage" => stage.name(),
        "hook" => hook.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);

    histogram!(
        "hermes_hook_duration_seconds",
        "stage" => stage.name(),
        "hook" => hook.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records the size of an outgoing envelope.
#[allow(clippy::cast_precision_loss)]
pub fn record_hook_payload(stage: HookStage, bytes: usize) {
    histogram!("hermes_hook_payload_bytes", "stage" => stage.name()).record(bytes as f64);
}

/// Records an authentication decision.
pub fn record_auth_decision(mechanism: &'static str, allowed: bool) {
    counter!(
        "hermes_auth_decisions_total",
        "mechanism" => mechanism,
        "outcome" => if allowed { "allowed" } else { "denied" }
    )
    .increment(1);
}

/// Records a request aborted at `stage`.
pub fn record_pipeline_abort(stage: HookStage, category: ErrorCategory) {
    let category = match category {
        ErrorCategory::Validation => "validation",
        ErrorCategory::Authentication => "authentication",
        ErrorCategory::Authorization => "authorization",
        ErrorCategory::NotFound => "not_found",
        ErrorCategory::Internal => "internal",
        ErrorCategory::External => "external",
        ErrorCategory::Timeout => "timeout",
    };
    counter!(
        "hermes_pipeline_aborts_total",
        "stage" => stage.name(),
        "category" => category
    )
    .increment(1);
}

/// Keeps `hermes_hooks_in_flight` raised while alive.
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Increments the gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!("hermes_hooks_in_flight").increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!("hermes_hooks_in_flight").decrement(1.0);
    }
}
