//! Core middleware trait and continuation type.
//!
//! Every pipeline stage implements [`Middleware`]. A stage sees the request
//! on the way in and the response on the way out, and decides whether the
//! rest of the chain runs at all.
//!
//! # Example
//!
//! ```
//! use hermes_middleware::{BoxFuture, Middleware, MiddlewareContext, Next, Request, Response};
//!
//! struct Tag;
//!
//! impl Middleware for Tag {
//!     fn name(&self) -> &'static str {
//!         "tag"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: &'a mut MiddlewareContext,
//!         request: Request,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, Response> {
//!         Box::pin(async move {
//!             let mut response = next.run(ctx, request).await;
//!             response
//!                 .headers_mut()
//!                 .insert("x-tag", http::HeaderValue::from_static("1"));
//!             response
//!         })
//!     }
//! }
//! ```

use crate::context::MiddlewareContext;
use crate::types::{Request, Response};
use std::future::Future;
use std::pin::Pin;

/// A boxed future that returns a response.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The terminal handler a chain ends in.
type Handler<'a> =
    Box<dyn FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'a>;

/// A single pipeline stage.
///
/// # Invariants
///
/// - A stage calls `next.run()` at most once; not calling it short-circuits
///   the pipeline with the stage's own response.
/// - A stage never swallows a downstream response silently; whatever it
///   returns is what the client sees.
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Process the request through this stage.
    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response>;
}

/// Continuation that invokes the rest of the chain.
///
/// Consumed by [`Next::run`], so it can be called once.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    Chain {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    Handler(Handler<'a>),
}

impl<'a> Next<'a> {
    /// Creates a `Next` that invokes `middleware` and then `next`.
    pub(crate) fn new(middleware: &'a dyn Middleware, next: Next<'a>) -> Self {
        Self {
            inner: NextInner::Chain {
                middleware,
                next: Box::new(next),
            },
        }
    }

    /// Creates a terminal `Next` that invokes the handler.
    ///
    /// Public so a single stage can be driven without a [`Pipeline`](crate::Pipeline).
    pub fn handler<F>(f: F) -> Self
    where
        F: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        Self {
            inner: NextInner::Handler(Box::new(f)),
        }
    }

    /// Invokes the next stage or the terminal handler.
    pub async fn run(self, ctx: &mut MiddlewareContext, request: Request) -> Response {
        match self.inner {
            NextInner::Chain { middleware, next } => {
                middleware.process(ctx, request, *next).await
            }
            NextInner::Handler(handler) => handler(ctx, request).await,
        }
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            NextInner::Chain { middleware, .. } => f
                .debug_struct("Next")
                .field("middleware", &middleware.name())
                .finish_non_exhaustive(),
            NextInner::Handler(_) => f.debug_struct("Next").field("handler", &true).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;

    struct ShortCircuit;

    impl Middleware for ShortCircuit {
        fn name(&self) -> &'static str {
            "short_circuit"
        }

        fn process<'a>(
            &'a self,
            _ctx: &'a mut MiddlewareContext,
            _request: Request,
            _next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                http::Response::builder()
                    .status(StatusCode::FORBIDDEN)
                    .body(Full::new(Bytes::new()))
                    .unwrap()
            })
        }
    }

    fn ok_handler() -> Next<'static> {
        Next::handler(|_ctx, _req| {
            Box::pin(async {
                http::Response::builder()
                    .status(StatusCode::OK)
                    .body(Full::new(Bytes::from("ok")))
                    .unwrap()
            })
        })
    }

    fn request() -> Request {
        http::Request::builder()
            .uri("/test")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_handler_runs() {
        let mut ctx = MiddlewareContext::new();
        let response = ok_handler().run(&mut ctx, request()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_handler() {
        let stage = ShortCircuit;
        let mut ctx = MiddlewareContext::new();
        let next = Next::new(&stage, ok_handler());
        let response = next.run(&mut ctx, request()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_debug_names_stage() {
        let stage = ShortCircuit;
        let next = Next::new(&stage, ok_handler());
        assert!(format!("{next:?}").contains("short_circuit"));
    }
}
