//! Hooks embedded in the gateway process.
//!
//! Calls still round-trip through the byte codec so size limits and decoding
//! behave exactly as they do over the network.

use super::HookTransport;
use crate::envelope::Envelope;
use crate::error::{BoxError, DispatchError};
use bytes::Bytes;
use hermes_middleware::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// A hook implemented in Rust.
pub trait HookHandler: Send + Sync + 'static {
    /// Handles one call and returns the modified envelope.
    fn handle(&self, envelope: Envelope) -> BoxFuture<'_, Result<Envelope, BoxError>>;
}

/// Adapts an async closure into a [`HookHandler`].
///
/// ```
/// use hermes_coprocess::driver::{HookFn, InProcessDriver};
///
/// let driver = InProcessDriver::new(1024).register(
///     "tag",
///     HookFn::new(|mut envelope| async move {
///         envelope.request.set_headers.insert("x-tag".into(), "1".into());
///         Ok(envelope)
///     }),
/// );
/// assert!(driver.has_hook("tag"));
/// ```
pub struct HookFn<F> {
    f: F,
}

impl<F, Fut> HookFn<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Envelope, BoxError>> + Send + 'static,
{
    /// Wraps `f`.
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> HookHandler for HookFn<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Envelope, BoxError>> + Send + 'static,
{
    fn handle(&self, envelope: Envelope) -> BoxFuture<'_, Result<Envelope, BoxError>> {
        Box::pin((self.f)(envelope))
    }
}

/// Dispatches to registered [`HookHandler`]s by name.
#[derive(Clone)]
pub struct InProcessDriver {
    handlers: HashMap<String, Arc<dyn HookHandler>>,
    max_message_size: usize,
}

impl InProcessDriver {
    /// Creates a driver enforcing `max_message_size` on replies.
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self {
            handlers: HashMap::new(),
            max_message_size,
        }
    }

    /// Registers `handler` under `name`.
    #[must_use]
    pub fn register(mut self, name: impl Into<String>, handler: impl HookHandler) -> Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Returns `true` if a handler is registered under `name`.
    #[must_use]
    pub fn has_hook(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

impl std::fmt::Debug for InProcessDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("InProcessDriver")
            .field("hooks", &names)
            .field("max_message_size", &self.max_message_size)
            .finish()
    }
}

impl HookTransport for InProcessDriver {
    fn exchange<'a>(
        &'a self,
        hook: &'a str,
        payload: Bytes,
    ) -> BoxFuture<'a, Result<Bytes, DispatchError>> {
        Box::pin(async move {
            let handler = self.handlers.get(hook).ok_or_else(|| {
                DispatchError::remote(format!("no in-process handler registered for '{hook}'"))
            })?;
            let envelope = Envelope::from_bytes(&payload)?;
            let reply = handler
                .handle(envelope)
                .await
                .map_err(|source| DispatchError::RemoteHook { source })?;
            let bytes = reply.to_bytes()?;
            if bytes.len() >= self.max_message_size {
                return Err(DispatchError::Oversize {
                    size: bytes.len(),
                    limit: self.max_message_size,
                });
            }
            Ok(Bytes::from(bytes))
        })
    }
}
