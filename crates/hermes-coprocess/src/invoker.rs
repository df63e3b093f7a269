//! Hook invocation.
//!
//! The invoker owns everything around a single hook call: size ceilings,
//! the per-call deadline, the transport, metrics and logs. It never retries.

use crate::driver::{Drivers, HookTransport};
use crate::envelope::Envelope;
use crate::error::DispatchError;
use bytes::Bytes;
use hermes_config::{CoprocessConfig, DriverKind};
use hermes_telemetry::metrics::{self as hook_metrics, HookOutcome, InFlightGuard};
use std::time::{Duration, Instant};

/// Calls hooks through the configured drivers.
#[derive(Debug, Clone)]
pub struct HookInvoker {
    drivers: Drivers,
    max_message_size: usize,
    hook_timeout: Duration,
}

impl HookInvoker {
    /// Creates an invoker with the limits in `config`.
    #[must_use]
    pub fn new(drivers: Drivers, config: &CoprocessConfig) -> Self {
        Self {
            drivers,
            max_message_size: config.max_message_size,
            hook_timeout: Duration::from_millis(config.hook_timeout_ms),
        }
    }

    /// Payload ceiling in bytes.
    #[must_use]
    pub const fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Sends `envelope` to its hook on `driver` and returns the parsed reply.
    ///
    /// The call is bounded by `min(hook_timeout, deadline - now)`. When the
    /// request deadline is what runs out the error is [`DispatchError::Timeout`];
    /// when the hook timeout does, it is a remote failure.
    pub async fn invoke(
        &self,
        api_id: &str,
        driver: DriverKind,
        envelope: Envelope,
        deadline: Option<Instant>,
    ) -> Result<Envelope, DispatchError> {
        let stage = envelope.stage;
        let hook = envelope.hook_name.clone();
        let started = Instant::now();

        let result = self.call(driver, envelope, deadline).await;

        let outcome = match &result {
            Ok(_) => HookOutcome::Ok,
            Err(DispatchError::Oversize { .. }) => HookOutcome::Oversize,
            Err(DispatchError::Decode(_)) => HookOutcome::Malformed,
            Err(DispatchError::Timeout) => HookOutcome::Timeout,
            Err(_) => HookOutcome::Error,
        };
        let elapsed = started.elapsed();
        hook_metrics::record_hook_invocation(stage, &hook, outcome, elapsed);

        match &result {
            Ok(_) => tracing::debug!(
                api_id,
                stage = %stage,
                hook = %hook,
                duration_ms = elapsed.as_millis() as u64,
                "hook call completed"
            ),
            Err(error) => tracing::warn!(
                api_id,
                stage = %stage,
                hook = %hook,
                duration_ms = elapsed.as_millis() as u64,
                error = %error,
                "hook call failed"
            ),
        }
        result
    }

    async fn call(
        &self,
        driver: DriverKind,
        envelope: Envelope,
        deadline: Option<Instant>,
    ) -> Result<Envelope, DispatchError> {
        self.check_size(envelope.largest_body())?;
        let payload = envelope.to_bytes()?;
        self.check_size(payload.len())?;
        hook_metrics::record_hook_payload(envelope.stage, payload.len());

        let transport = self.drivers.get(driver).ok_or_else(|| {
            DispatchError::remote(format!("no {driver:?} driver configured"))
        })?;

        let (budget, bounded_by_request) = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(DispatchError::Timeout);
                }
                if remaining < self.hook_timeout {
                    (remaining, true)
                } else {
                    (self.hook_timeout, false)
                }
            }
            None => (self.hook_timeout, false),
        };

        let _in_flight = InFlightGuard::new();
        let reply = tokio::time::timeout(
            budget,
            transport.exchange(&envelope.hook_name, Bytes::from(payload)),
        )
        .await;

        let reply = match reply {
            Ok(reply) => reply?,
            Err(_) if bounded_by_request => return Err(DispatchError::Timeout),
            Err(_) => {
                return Err(DispatchError::remote(format!(
                    "hook did not answer within {}ms",
                    budget.as_millis()
                )))
            }
        };

        self.check_size(reply.len())?;
        Envelope::from_bytes(&reply)
    }

    fn check_size(&self, size: usize) -> Result<(), DispatchError> {
        if size >= self.max_message_size {
            return Err(DispatchError::Oversize {
                size,
                limit: self.max_message_size,
            });
        }
        Ok(())
    }
}
