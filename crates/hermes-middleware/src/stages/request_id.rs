//! Request ID stage.
//!
//! Every request gets a UUID v7 id. The id is stamped on the context, passed
//! upstream in `x-request-id` so hooks and the backend can log it, and echoed
//! back on the response.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use hermes_core::RequestId;
use http::HeaderValue;
use uuid::Uuid;

/// The header name for request ID propagation.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generates or propagates request IDs.
#[derive(Debug, Clone, Default)]
pub struct RequestIdMiddleware {
    /// Reuse a well-formed incoming `x-request-id` instead of minting one.
    trust_incoming: bool,
}

impl RequestIdMiddleware {
    /// Always generates a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuses a valid incoming `x-request-id` header.
    #[must_use]
    pub fn trust_incoming() -> Self {
        Self {
            trust_incoming: true,
        }
    }

    fn extract_request_id(&self, request: &Request) -> Option<RequestId> {
        if !self.trust_incoming {
            return None;
        }

        request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(RequestId::from_uuid)
    }
}

impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &'static str {
        "request_id"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        mut request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let request_id = self
                .extract_request_id(&request)
                .unwrap_or_else(RequestId::new);
            ctx.set_request_id(request_id);

            // A UUID always renders as a valid header value.
            let header = HeaderValue::from_str(&request_id.to_string()).ok();
            if let Some(value) = header.clone() {
                request.headers_mut().insert(REQUEST_ID_HEADER, value);
            }

            let mut response = next.run(ctx, request).await;

            if let Some(value) = header {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;

    fn create_test_request(id: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri("/anything");
        if let Some(id) = id {
            builder = builder.header(REQUEST_ID_HEADER, id);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    /// Echoes the upstream-visible request id back in `x-seen-id`.
    fn echo_handler() -> Next<'static> {
        Next::handler(|_ctx, req| {
            let seen = req.headers().get(REQUEST_ID_HEADER).cloned();
            Box::pin(async move {
                let mut builder = http::Response::builder().status(StatusCode::OK);
                if let Some(seen) = seen {
                    builder = builder.header("x-seen-id", seen);
                }
                builder.body(Full::new(Bytes::new())).unwrap()
            })
        })
    }

    #[tokio::test]
    async fn test_generates_request_id() {
        let middleware = RequestIdMiddleware::new();
        let mut ctx = MiddlewareContext::new();
        let original = ctx.request_id();

        let response = middleware
            .process(&mut ctx, create_test_request(None), echo_handler())
            .await;

        assert_ne!(ctx.request_id(), original);
        let header = response.headers().get(REQUEST_ID_HEADER).unwrap();
        assert_eq!(header.to_str().unwrap(), ctx.request_id().to_string());
        assert_eq!(response.headers().get("x-seen-id").unwrap(), header);
    }

    #[tokio::test]
    async fn test_ignores_incoming_when_untrusted() {
        let incoming = "01941f29-7c00-7000-8000-000000000001";
        let middleware = RequestIdMiddleware::new();
        let mut ctx = MiddlewareContext::new();

        middleware
            .process(&mut ctx, create_test_request(Some(incoming)), echo_handler())
            .await;

        assert_ne!(ctx.request_id().to_string(), incoming);
    }

    #[tokio::test]
    async fn test_trusts_incoming() {
        let incoming = "01941f29-7c00-7000-8000-000000000001";
        let middleware = RequestIdMiddleware::trust_incoming();
        let mut ctx = MiddlewareContext::new();

        let response = middleware
            .process(&mut ctx, create_test_request(Some(incoming)), echo_handler())
            .await;

        assert_eq!(ctx.request_id().to_string(), incoming);
        assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), incoming);
    }

    #[tokio::test]
    async fn test_malformed_incoming_is_replaced() {
        let middleware = RequestIdMiddleware::trust_incoming();
        let mut ctx = MiddlewareContext::new();

        let response = middleware
            .process(&mut ctx, create_test_request(Some("not-a-uuid")), echo_handler())
            .await;

        let header = response.headers().get(REQUEST_ID_HEADER).unwrap();
        assert_ne!(header, "not-a-uuid");
        assert!(Uuid::parse_str(header.to_str().unwrap()).is_ok());
    }
}
