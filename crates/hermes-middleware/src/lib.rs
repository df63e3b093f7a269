//! # Hermes Middleware
//!
//! The request pipeline the gateway runs every proxied call through.
//!
//! A [`Pipeline`] is an ordered list of [`Middleware`] stages wrapped around
//! an upstream handler. Each stage receives a mutable [`MiddlewareContext`],
//! the request and a [`Next`] continuation; it may rewrite the request, call
//! `next` exactly once, rewrite the response, or short-circuit with its own
//! response.
//!
//! ```text
//! Request → RequestId → Coprocess(pre, auth, post) → Upstream
//!                                                      ↓
//! Response ← RequestId ← ResponseHeaders ← Coprocess(response)
//! ```
//!
//! The out-of-process hook stages live in `hermes-coprocess`; this crate
//! provides the seam plus two built-in stages:
//!
//! | Stage | Purpose |
//! |-------|---------|
//! | [`stages::RequestIdMiddleware`] | Generate or propagate the request id |
//! | [`stages::ResponseHeadersMiddleware`] | Add per-API headers, expanding `$tyk_meta.<key>` from session metadata |
//!
//! ## Example
//!
//! ```
//! use hermes_middleware::{Pipeline, stages::RequestIdMiddleware};
//!
//! let pipeline = Pipeline::builder()
//!     .stage(RequestIdMiddleware::new())
//!     .build();
//! assert_eq!(pipeline.stage_names(), ["request_id"]);
//! ```

#![doc(html_root_url = "https://docs.rs/hermes-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod middleware;
pub mod pipeline;
pub mod stages;
pub mod types;

pub use context::MiddlewareContext;
pub use middleware::{BoxFuture, Middleware, Next};
pub use pipeline::{BoxedMiddleware, Pipeline, PipelineBuilder};
pub use types::{Request, Response, ResponseExt};
