//! Error classification shared across the gateway crates.
//!
//! Each crate keeps its own `thiserror` enum. They all map onto an
//! [`ErrorCategory`], which owns the HTTP status, and render client-facing
//! failures as an [`ErrorEnvelope`].

use crate::RequestId;
use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Categories of errors for classification and status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or incomplete request (e.g. a missing credential).
    Validation,
    /// Credentials could not be verified.
    Authentication,
    /// The caller is known but not allowed in.
    Authorization,
    /// Resource not found.
    NotFound,
    /// Gateway-side failure, including hook failures.
    Internal,
    /// Upstream service failure.
    External,
    /// The request ran out of time.
    Timeout,
}

impl ErrorCategory {
    /// Returns the default HTTP status code for this category.
    #[must_use]
    pub const fn default_status_code(&self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::External => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Returns `true` for categories whose details must not reach clients.
    #[must_use]
    pub const fn is_server_side(&self) -> bool {
        matches!(self, Self::Internal | Self::External | Self::Timeout)
    }
}

/// JSON body returned to clients when the gateway aborts a request.
///
/// ```json
/// {
///   "error": { "code": "MISSING_CREDENTIAL", "message": "Authorization field missing", "category": "validation" },
///   "request_id": "0190..."
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error details.
    pub error: ErrorDetail,
    /// Request id for correlation with gateway logs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Detail block inside an [`ErrorEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Error category.
    pub category: ErrorCategory,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorEnvelope {
    /// Creates an envelope without details.
    #[must_use]
    pub fn new(
        category: ErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
        request_id: Option<&RequestId>,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                category,
                details: None,
            },
            request_id: request_id.map(ToString::to_string),
        }
    }

    /// Attaches structured details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }

    /// Serializes the envelope, falling back to a fixed body if that fails.
    #[must_use]
    pub fn to_json_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| {
            br#"{"error":{"code":"INTERNAL_ERROR","message":"error serialization failed","category":"internal"}}"#
                .to_vec()
        })
    }
}
