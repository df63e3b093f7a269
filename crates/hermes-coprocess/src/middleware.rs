//! Pipeline stage running an API's hooks around the upstream call.

use crate::dispatcher::{ApiDispatcher, RequestFlow};
use crate::envelope::Transaction;
use crate::error::{DispatchError, StageError};
use hermes_core::HookStage;
use hermes_middleware::{BoxFuture, Middleware, MiddlewareContext, Next, Request, Response};
use hermes_telemetry::metrics::record_pipeline_abort;
use std::sync::Arc;
use std::time::Duration;

/// Runs Pre, AuthCheck and Post before `next`, and Response after it.
#[derive(Debug, Clone)]
pub struct CoprocessMiddleware {
    dispatcher: Arc<ApiDispatcher>,
    request_timeout: Duration,
}

impl CoprocessMiddleware {
    /// Wraps `dispatcher`; every request gets `request_timeout` end to end.
    pub fn new(dispatcher: Arc<ApiDispatcher>, request_timeout: Duration) -> Self {
        Self {
            dispatcher,
            request_timeout,
        }
    }

    /// The dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &ApiDispatcher {
        &self.dispatcher
    }

    fn abort(&self, ctx: &MiddlewareContext, error: StageError) -> Response {
        record_pipeline_abort(error.stage, error.error.category());
        if error.error.category().is_server_side() {
            tracing::error!(
                api_id = %self.dispatcher.api().api_id,
                request_id = %ctx.request_id(),
                stage = %error.stage,
                hook = error.hook.as_deref().unwrap_or(""),
                error = %error.error,
                "request aborted"
            );
        } else {
            tracing::info!(
                api_id = %self.dispatcher.api().api_id,
                request_id = %ctx.request_id(),
                stage = %error.stage,
                error = %error.error,
                "request rejected"
            );
        }
        error.into_response(&ctx.request_id())
    }
}

impl Middleware for CoprocessMiddleware {
    fn name(&self) -> &'static str {
        "coprocess"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            ctx.set_api_id(self.dispatcher.api().api_id.clone());
            if ctx.deadline().is_none() {
                ctx.set_deadline(self.request_timeout);
            }
            let deadline = ctx.deadline();

            let mut tx = Transaction::from_request(request).await;
            let identity = match self.dispatcher.before_upstream(&mut tx, deadline).await {
                Ok(RequestFlow::Forward(identity)) => identity,
                Ok(RequestFlow::Respond(response)) => return response,
                Err(error) => return self.abort(ctx, error),
            };

            let session = identity.map(|reconciled| {
                ctx.set_session(
                    reconciled.session.key.clone(),
                    reconciled.response_metadata,
                );
                reconciled.session
            });

            let remaining = ctx.remaining();
            let upstream = next.run(ctx, tx.forward_request());
            let response = match remaining {
                Some(remaining) => {
                    let result = tokio::time::timeout(remaining, upstream).await;
                    match result {
                        Ok(response) => response,
                        Err(_) => {
                            // Reported against the last request-side stage.
                            let error = StageError::new(HookStage::Post, DispatchError::Timeout);
                            return self.abort(ctx, error);
                        }
                    }
                }
                None => upstream.await,
            };

            if !self.dispatcher.has_response_hooks() {
                return response;
            }

            tx.capture_response(response).await;
            if let Err(error) = self
                .dispatcher
                .run_stage(HookStage::Response, &mut tx, session.as_ref(), deadline)
                .await
            {
                return self.abort(ctx, error);
            }
            match tx.take_response() {
                Some(response) => response,
                None => self.abort(
                    ctx,
                    StageError::new(
                        HookStage::Response,
                        DispatchError::decode("response mirror lost"),
                    ),
                ),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthReconciler;
    use crate::driver::Drivers;
    use crate::invoker::HookInvoker;
    use crate::session::MemorySessionStore;
    use bytes::Bytes;
    use hermes_config::{ApiDefinition, CoprocessConfig};
    use hermes_middleware::{Pipeline, ResponseExt};
    use http::StatusCode;
    use http_body_util::Full;

    fn middleware(timeout: Duration) -> CoprocessMiddleware {
        let config = CoprocessConfig::default();
        let dispatcher = ApiDispatcher::new(
            Arc::new(ApiDefinition::new("plain", "default")),
            HookInvoker::new(Drivers::new(), &config),
            AuthReconciler::new(Arc::new(MemorySessionStore::new())),
        )
        .unwrap();
        CoprocessMiddleware::new(Arc::new(dispatcher), timeout)
    }

    fn request() -> Request {
        http::Request::builder()
            .uri("/plain")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_api_without_hooks_passes_through() {
        let pipeline = Pipeline::builder()
            .stage(middleware(Duration::from_secs(5)))
            .build();

        let response = pipeline
            .process(MiddlewareContext::new(), request(), |ctx, _req| {
                let api_id = ctx.api_id().map(ToString::to_string);
                Box::pin(async move {
                    assert_eq!(api_id.as_deref(), Some("plain"));
                    Response::with_body(StatusCode::OK, Bytes::from_static(b"ok"), "text/plain")
                })
            })
            .await;

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_upstream_times_out() {
        let pipeline = Pipeline::builder()
            .stage(middleware(Duration::from_millis(50)))
            .build();

        let response = pipeline
            .process(MiddlewareContext::new(), request(), |_ctx, _req| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Response::error(StatusCode::OK, "late")
                })
            })
            .await;

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
