//! Dispatch errors.
//!
//! [`DispatchError`] classifies everything that can go wrong while a request
//! crosses the hook boundary. [`StageError`] pins it to the stage and hook
//! where it happened and owns the mapping to an HTTP response.

use hermes_core::{ErrorCategory, ErrorEnvelope, HookStage, RequestId};
use hermes_middleware::{Response, ResponseExt};
use http::StatusCode;
use thiserror::Error;

/// Boxed transport cause.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Message returned to callers for any denied authentication.
pub const ACCESS_DENIED_MESSAGE: &str = "Access to this API has been disallowed";

/// Message returned to callers for 5xx failures; the cause is only logged.
pub const INTERNAL_ERROR_MESSAGE: &str = "There was a problem proxying the request";

/// Errors produced while dispatching a request through hooks.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The hook replied with an envelope that cannot be applied.
    #[error("malformed hook reply: {0}")]
    Decode(String),

    /// A payload hit the size ceiling. No remote call was made for it.
    #[error("payload of {size} bytes exceeds the {limit} byte ceiling")]
    Oversize {
        /// Offending size in bytes.
        size: usize,
        /// Configured ceiling in bytes.
        limit: usize,
    },

    /// The transport failed or the hook reported an error.
    #[error("hook call failed: {source}")]
    RemoteHook {
        /// Original cause.
        #[source]
        source: BoxError,
    },

    /// The credential source named by the API is absent from the request.
    #[error("{field} field missing")]
    MissingSource {
        /// Header, query parameter or `body`.
        field: String,
    },

    /// The caller was not authenticated.
    #[error("authentication failed: {reason}")]
    Authentication {
        /// Why, for logs only.
        reason: String,
    },

    /// The request deadline passed.
    #[error("request deadline exceeded")]
    Timeout,
}

impl DispatchError {
    /// Wraps a transport cause.
    pub fn remote(source: impl Into<BoxError>) -> Self {
        Self::RemoteHook {
            source: source.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode(reason.into())
    }

    /// Creates an authentication failure.
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    /// Creates a missing-source error for `field`.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingSource {
            field: field.into(),
        }
    }

    /// Returns the error category, which owns the status code.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Decode(_) | Self::Oversize { .. } | Self::RemoteHook { .. } => {
                ErrorCategory::Internal
            }
            Self::MissingSource { .. } => ErrorCategory::Validation,
            Self::Authentication { .. } => ErrorCategory::Authorization,
            Self::Timeout => ErrorCategory::Timeout,
        }
    }

    /// Returns the machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "MALFORMED_HOOK_REPLY",
            Self::Oversize { .. } => "PAYLOAD_TOO_LARGE",
            Self::RemoteHook { .. } => "HOOK_UNAVAILABLE",
            Self::MissingSource { .. } => "MISSING_CREDENTIAL",
            Self::Authentication { .. } => "ACCESS_DENIED",
            Self::Timeout => "TIMEOUT",
        }
    }

    /// Returns the message shown to callers.
    ///
    /// Never names hook internals.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::MissingSource { .. } => self.to_string(),
            Self::Authentication { .. } => ACCESS_DENIED_MESSAGE.to_string(),
            Self::Timeout => "Upstream request timed out".to_string(),
            _ => INTERNAL_ERROR_MESSAGE.to_string(),
        }
    }
}

/// A [`DispatchError`] tied to the stage and hook that raised it.
#[derive(Debug, Error)]
pub struct StageError {
    /// Stage that aborted.
    pub stage: HookStage,
    /// Hook being run, if the failure is attributable to one.
    pub hook: Option<String>,
    /// Underlying error.
    #[source]
    pub error: DispatchError,
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.hook {
            Some(hook) => write!(f, "{} stage failed in hook '{hook}': {}", self.stage, self.error),
            None => write!(f, "{} stage failed: {}", self.stage, self.error),
        }
    }
}

impl StageError {
    /// Creates a stage error not tied to a hook.
    pub fn new(stage: HookStage, error: DispatchError) -> Self {
        Self {
            stage,
            hook: None,
            error,
        }
    }

    /// Creates a stage error raised by `hook`.
    pub fn in_hook(stage: HookStage, hook: impl Into<String>, error: DispatchError) -> Self {
        Self {
            stage,
            hook: Some(hook.into()),
            error,
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.error.category().default_status_code()
    }

    /// Caller-facing error envelope.
    #[must_use]
    pub fn envelope(&self, request_id: Option<&RequestId>) -> ErrorEnvelope {
        ErrorEnvelope::new(
            self.error.category(),
            self.error.code(),
            self.error.public_message(),
            request_id,
        )
    }

    /// Converts into the abort response.
    #[must_use]
    pub fn into_response(self, request_id: &RequestId) -> Response {
        Response::from_envelope(self.status(), &self.envelope(Some(request_id)))
    }
}
