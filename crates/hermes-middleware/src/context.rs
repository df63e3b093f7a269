//! Per-request state carried through the pipeline.

use hermes_core::{Metadata, RequestId};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Context that flows through the middleware pipeline.
///
/// Stages enrich it as the request moves along: the request id stage stamps
/// the id, the coprocess stage records the API, the authenticated session
/// key and the session metadata later stages template from.
///
/// # Example
///
/// ```
/// use hermes_middleware::MiddlewareContext;
///
/// let mut ctx = MiddlewareContext::new();
/// ctx.set_api_id("orders");
/// ctx.set_session("org1abc", Default::default());
///
/// assert_eq!(ctx.api_id(), Some("orders"));
/// assert_eq!(ctx.session_key(), Some("org1abc"));
/// ```
#[derive(Debug)]
pub struct MiddlewareContext {
    request_id: RequestId,
    api_id: Option<String>,
    session_key: Option<String>,
    session_metadata: Metadata,
    started_at: Instant,
    deadline: Option<Instant>,

    /// Type-erased extension data.
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl MiddlewareContext {
    /// Creates a new context with a fresh request ID.
    #[must_use]
    pub fn new() -> Self {
        Self::with_request_id(RequestId::new())
    }

    /// Creates a context with a specific request ID.
    #[must_use]
    pub fn with_request_id(request_id: RequestId) -> Self {
        Self {
            request_id,
            api_id: None,
            session_key: None,
            session_metadata: Metadata::new(),
            started_at: Instant::now(),
            deadline: None,
            extensions: HashMap::new(),
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Sets the request ID.
    pub fn set_request_id(&mut self, request_id: RequestId) {
        self.request_id = request_id;
    }

    /// Returns the API the request was routed to, if known.
    #[must_use]
    pub fn api_id(&self) -> Option<&str> {
        self.api_id.as_deref()
    }

    /// Records the API the request was routed to.
    pub fn set_api_id(&mut self, api_id: impl Into<String>) {
        self.api_id = Some(api_id.into());
    }

    /// Returns the canonical session key once the caller is authenticated.
    #[must_use]
    pub fn session_key(&self) -> Option<&str> {
        self.session_key.as_deref()
    }

    /// Returns the metadata of the authenticated session.
    ///
    /// Empty for keyless requests.
    #[must_use]
    pub fn session_metadata(&self) -> &Metadata {
        &self.session_metadata
    }

    /// Records the authenticated session.
    pub fn set_session(&mut self, key: impl Into<String>, metadata: Metadata) {
        self.session_key = Some(key.into());
        self.session_metadata = metadata;
    }

    /// Returns when the request started processing.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Bounds the whole request to `budget` from when it started.
    pub fn set_deadline(&mut self, budget: Duration) {
        self.deadline = Some(self.started_at + budget);
    }

    /// Returns the request deadline, if one was set.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` when no deadline is set,
    /// `Some(Duration::ZERO)` once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Stores a typed extension value.
    ///
    /// ```
    /// use hermes_middleware::MiddlewareContext;
    ///
    /// struct Upstream(&'static str);
    ///
    /// let mut ctx = MiddlewareContext::new();
    /// ctx.set_extension(Upstream("http://orders:8080"));
    /// assert_eq!(ctx.get_extension::<Upstream>().unwrap().0, "http://orders:8080");
    /// ```
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Checks if an extension of the given type exists.
    #[must_use]
    pub fn has_extension<T: Send + Sync + 'static>(&self) -> bool {
        self.extensions.contains_key(&TypeId::of::<T>())
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}
