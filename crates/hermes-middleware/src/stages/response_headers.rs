//! Per-API global response headers.
//!
//! Header values may reference session metadata with `$tyk_meta.<key>`; the
//! reference is replaced by the authenticated session's value for `key`, or
//! by an empty string when the key is absent. Keyless requests have no
//! session, so every reference expands to nothing.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use hermes_core::Metadata;
use http::header::{HeaderName, HeaderValue};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Prefix of a session metadata reference inside a header template.
pub const META_TEMPLATE_PREFIX: &str = "$tyk_meta.";

/// Adds configured headers to every response.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeadersMiddleware {
    headers: Vec<(HeaderName, String)>,
}

impl ResponseHeadersMiddleware {
    /// Builds the stage from name → template pairs.
    ///
    /// Names that are not valid HTTP header names are skipped with a warning.
    #[must_use]
    pub fn new(headers: &BTreeMap<String, String>) -> Self {
        let headers = headers
            .iter()
            .filter_map(|(name, template)| match HeaderName::try_from(name.as_str()) {
                Ok(name) => Some((name, template.clone())),
                Err(_) => {
                    tracing::warn!(header = %name, "skipping invalid global response header");
                    None
                }
            })
            .collect();
        Self { headers }
    }

    /// Returns `true` when no headers are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let pattern = format!(r"{}([A-Za-z0-9_-]*)", regex::escape(META_TEMPLATE_PREFIX));
        Regex::new(&pattern).expect("valid regex")
    })
}

/// Expands every `$tyk_meta.<key>` in `template`.
///
/// A key runs until the first character that is not an ASCII alphanumeric,
/// `_` or `-`.
#[must_use]
pub fn render_template(template: &str, metadata: &Metadata) -> String {
    reference_pattern()
        .replace_all(template, |caps: &Captures<'_>| {
            metadata
                .get(&caps[1])
                .map(ToString::to_string)
                .unwrap_or_default()
        })
        .into_owned()
}

impl Middleware for ResponseHeadersMiddleware {
    fn name(&self) -> &'static str {
        "response_headers"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let mut response = next.run(ctx, request).await;
            for (name, template) in &self.headers {
                let rendered = render_template(template, ctx.session_metadata());
                match HeaderValue::from_str(&rendered) {
                    Ok(value) => {
                        response.headers_mut().insert(name.clone(), value);
                    }
                    Err(_) => {
                        tracing::warn!(header = %name, "rendered header value is not valid");
                    }
                }
            }
            response
        })
    }
}
