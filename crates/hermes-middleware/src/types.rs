//! HTTP types used throughout the pipeline.

use bytes::Bytes;
use hermes_core::ErrorEnvelope;
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::Full;

/// The HTTP request type used in the pipeline.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the pipeline.
pub type Response = http::Response<Full<Bytes>>;

/// Extension trait for building gateway-generated responses.
pub trait ResponseExt {
    /// Plain-text response.
    fn error(status: StatusCode, message: &str) -> Response;

    /// JSON error envelope response.
    fn from_envelope(status: StatusCode, envelope: &ErrorEnvelope) -> Response;

    /// Response with the given status, body and content type.
    fn with_body(status: StatusCode, body: Bytes, content_type: &'static str) -> Response;
}

impl ResponseExt for Response {
    fn error(status: StatusCode, message: &str) -> Response {
        Self::with_body(
            status,
            Bytes::from(message.to_string()),
            "text/plain; charset=utf-8",
        )
    }

    fn from_envelope(status: StatusCode, envelope: &ErrorEnvelope) -> Response {
        Self::with_body(
            status,
            Bytes::from(envelope.to_json_bytes()),
            "application/json",
        )
    }

    fn with_body(status: StatusCode, body: Bytes, content_type: &'static str) -> Response {
        let len = body.len();
        let mut response = http::Response::new(Full::new(body));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        response
    }
}
