//! Shared fixtures: test hooks, API definitions and an echoing upstream.

#![allow(dead_code)]

use bytes::Bytes;
use hermes_config::{
    ApiDefinition, AuthConfig, AuthType, CoprocessConfig, DriverKind, HookDescriptor,
    IdExtractorConfig, IgnoredPath,
};
use hermes_core::{MetaValue, Metadata};
use hermes_coprocess::driver::{Drivers, HookFn, InProcessDriver};
use hermes_coprocess::envelope::{Envelope, ReturnOverrides};
use hermes_coprocess::error::BoxError;
use hermes_coprocess::auth::RATE_METADATA_KEY;
use hermes_coprocess::{ApiRegistry, MemorySessionStore, Session};
use hermes_middleware::{BoxFuture, MiddlewareContext, Request, Response};
use http::header::CONTENT_LENGTH;
use http::{HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const ORG: &str = "default";
pub const CUSTOM_AUTH_META: &str = "customAuthSessionMetaValue";
pub const AUTH_TOKEN_META: &str = "authTokenSessionMetaValue";
pub const SESSION_META_KEY: &str = "sessionMetaKey";
pub const RATE_HEADER: &str = "x-rate-limit";

/// Metadata the Post hook insists on.
pub fn nested_metadata() -> Metadata {
    Metadata::from([
        (
            "testkey".to_string(),
            MetaValue::Map(BTreeMap::from([(
                "nestedkey".to_string(),
                MetaValue::from("nestedvalue"),
            )])),
        ),
        ("testkey2".to_string(), MetaValue::from("testvalue")),
    ])
}

fn first_header<'a>(envelope: &'a Envelope, name: &str) -> Option<&'a str> {
    envelope
        .request
        .headers
        .get(name)
        .and_then(|values| values.first())
        .map(String::as_str)
}

fn response_header(envelope: &mut Envelope, name: &str, value: &str) {
    if let Some(response) = envelope.response.as_mut() {
        response
            .headers
            .insert(name.to_string(), vec![value.to_string()]);
    }
}

fn set_testheader(mut envelope: Envelope) -> Result<Envelope, BoxError> {
    envelope
        .request
        .set_headers
        .insert("Testheader".to_string(), "testvalue".to_string());
    Ok(envelope)
}

/// The hooks every test gateway registers.
pub fn hooks(config: &CoprocessConfig) -> InProcessDriver {
    InProcessDriver::new(config.max_message_size)
        .register(
            "testPreHook1",
            HookFn::new(|envelope: Envelope| async move { set_testheader(envelope) }),
        )
        .register(
            "testPreHook1Again",
            HookFn::new(|envelope: Envelope| async move { set_testheader(envelope) }),
        )
        .register(
            "expectTestheaderHook",
            HookFn::new(|envelope: Envelope| async move {
                if envelope.request.headers.get("testheader") != Some(&vec!["testvalue".to_string()]) {
                    return Err::<Envelope, BoxError>("Testheader not set by an earlier hook".into());
                }
                Ok(envelope)
            }),
        )
        .register("testPreHook2", HookFn::new(|envelope| async move { Ok(envelope) }))
        .register(
            "testPostHook1",
            HookFn::new(|envelope: Envelope| async move {
                let metadata = envelope.session.as_ref().map(|s| &s.metadata);
                if metadata != Some(&nested_metadata()) {
                    return Err::<Envelope, BoxError>("unexpected session metadata".into());
                }
                Ok(envelope)
            }),
        )
        .register(
            "testResponseHook",
            HookFn::new(|mut envelope: Envelope| async move {
                if let Some(response) = envelope.response.as_mut() {
                    response.body = Bytes::from_static(b"newbody");
                }
                Ok(envelope)
            }),
        )
        .register(
            "testAuthHook1",
            HookFn::new(|mut envelope: Envelope| async move {
                if first_header(&envelope, "authorization") == Some("abc") {
                    let metadata = Metadata::from([(
                        SESSION_META_KEY.to_string(),
                        MetaValue::from(CUSTOM_AUTH_META),
                    )]);
                    envelope.session = Some(Session::default().with_rate(100.0, 1.0).with_metadata(metadata));
                }
                Ok(envelope)
            }),
        )
        .register(
            "testConfigDataResponseHook",
            HookFn::new(|mut envelope: Envelope| async move {
                let seen = envelope.spec.config_data.get("key").and_then(MetaValue::as_str)
                    == Some("value");
                response_header(&mut envelope, "x-config-data", if seen { "true" } else { "false" });
                Ok(envelope)
            }),
        )
        .register(
            "metadataPreHook",
            HookFn::new(|mut envelope: Envelope| async move {
                envelope
                    .metadata
                    .insert("pre_marker".to_string(), MetaValue::from("from-pre"));
                Ok(envelope)
            }),
        )
        .register(
            "metadataPostHook",
            HookFn::new(|mut envelope: Envelope| async move {
                let marker = envelope
                    .metadata
                    .get("pre_marker")
                    .map(ToString::to_string)
                    .unwrap_or_default();
                envelope
                    .request
                    .set_headers
                    .insert("x-pre-marker".to_string(), marker);
                Ok(envelope)
            }),
        )
        .register(
            "blockingPreHook",
            HookFn::new(|mut envelope: Envelope| async move {
                envelope.request.return_overrides = Some(ReturnOverrides {
                    response_code: 429,
                    response_body: "slow down".to_string(),
                    headers: BTreeMap::new(),
                });
                Ok(envelope)
            }),
        )
        .register(
            "malformedHook",
            HookFn::new(|mut envelope: Envelope| async move {
                envelope.request.method = "NOT A METHOD".to_string();
                Ok(envelope)
            }),
        )
        .register(
            "slowHook",
            HookFn::new(|envelope| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(envelope)
            }),
        )
}

fn in_process(api: &mut ApiDefinition) {
    api.custom_middleware.driver = DriverKind::InProcess;
}

/// Not keyless, token auth on `authorization`, one Pre hook.
pub fn pre_hook_api() -> ApiDefinition {
    let mut api = ApiDefinition::new("1", ORG);
    in_process(&mut api);
    api.use_keyless = false;
    api.auth = AuthConfig {
        auth_header_name: "authorization".to_string(),
    };
    api.custom_middleware.pre.push(HookDescriptor::named("testPreHook1"));
    api
}

/// Keyless, passthrough Pre hook.
pub fn keyless_api() -> ApiDefinition {
    let mut api = ApiDefinition::new("2", ORG);
    in_process(&mut api);
    api.custom_middleware.pre.push(HookDescriptor::named("testPreHook2"));
    api
}

/// Token auth, Post hook checking session metadata.
pub fn post_hook_api() -> ApiDefinition {
    let mut api = pre_hook_api();
    api.api_id = "3".to_string();
    api.custom_middleware.pre.clear();
    api.custom_middleware.post.push(HookDescriptor::named("testPostHook1"));
    api
}

/// Token auth, Response hook replacing the body.
pub fn response_hook_api() -> ApiDefinition {
    let mut api = pre_hook_api();
    api.api_id = "4".to_string();
    api.custom_middleware.pre.clear();
    api.custom_middleware
        .response
        .push(HookDescriptor::named("testResponseHook"));
    api
}

/// Custom auth with header extraction and a case-insensitive ignored path.
pub fn ignore_api() -> ApiDefinition {
    let mut api = ApiDefinition::new("ignore_plugin", ORG);
    in_process(&mut api);
    api.use_keyless = false;
    api.enable_coprocess_auth = true;
    api.custom_middleware.auth_check = Some(HookDescriptor::named("testAuthHook1"));
    api.custom_middleware.id_extractor = IdExtractorConfig::header("Authorization");
    api.ignored_paths.push(IgnoredPath {
        path: "/anything".to_string(),
        ignore_case: true,
    });
    api
}

/// Custom auth via the AuthCheck hook.
pub fn auth_hook_api(id: &str, extractor_enabled: bool) -> ApiDefinition {
    let mut api = ApiDefinition::new(id, ORG);
    in_process(&mut api);
    api.use_keyless = false;
    api.enable_coprocess_auth = true;
    api.custom_middleware.auth_check = Some(HookDescriptor::named("testAuthHook1"));
    let mut extractor = IdExtractorConfig::header("Authorization");
    extractor.disabled = !extractor_enabled;
    api.custom_middleware.id_extractor = extractor;
    api
}

/// Keyless, Response hook reporting whether it saw config data.
pub fn config_data_api(id: &str, disabled: bool) -> ApiDefinition {
    let mut api = ApiDefinition::new(id, ORG);
    in_process(&mut api);
    api.custom_middleware
        .response
        .push(HookDescriptor::named("testConfigDataResponseHook"));
    api.config_data = Metadata::from([("key".to_string(), MetaValue::from("value"))]);
    api.config_data_disabled = disabled;
    api
}

/// Custom auth and token auth together.
pub fn multi_auth_api(base: AuthType) -> ApiDefinition {
    let mut api = ApiDefinition::new("my-api-id", ORG);
    in_process(&mut api);
    api.use_keyless = false;
    api.enable_coprocess_auth = true;
    api.use_standard_auth = true;
    api.base_identity_provided_by = Some(base);
    api.auth_configs.auth_token = Some(AuthConfig {
        auth_header_name: "AuthToken".to_string(),
    });
    api.custom_middleware.auth_check = Some(HookDescriptor::named("testAuthHook1"));
    api.global_response_headers.insert(
        SESSION_META_KEY.to_string(),
        format!("$tyk_meta.{SESSION_META_KEY}"),
    );
    api.global_response_headers
        .insert(RATE_HEADER.to_string(), format!("$tyk_meta.{RATE_METADATA_KEY}"));
    api
}

/// Keyless API with the given Pre and Post hooks.
pub fn hooks_api(id: &str, pre: &[&str], post: &[&str]) -> ApiDefinition {
    let mut api = ApiDefinition::new(id, ORG);
    in_process(&mut api);
    api.custom_middleware.pre = pre.iter().map(|h| HookDescriptor::named(*h)).collect();
    api.custom_middleware.post = post.iter().map(|h| HookDescriptor::named(*h)).collect();
    api
}

/// A registry over an in-memory store, with `apis` loaded.
pub fn gateway(
    config: &CoprocessConfig,
    apis: Vec<ApiDefinition>,
) -> (ApiRegistry, Arc<MemorySessionStore>) {
    let store = Arc::new(MemorySessionStore::new());
    let registry = ApiRegistry::new(config, Drivers::new().with(hooks(config)), store.clone());
    registry.reload(apis).unwrap();
    (registry, store)
}

/// Counts upstream calls.
#[derive(Debug, Clone, Default)]
pub struct Upstream {
    calls: Arc<AtomicUsize>,
}

impl Upstream {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Echoes the body and reports what it saw in `x-upstream-*` headers.
    pub fn handler(
        &self,
    ) -> impl FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'static
    {
        let calls = Arc::clone(&self.calls);
        move |_ctx: &mut MiddlewareContext, req: Request| -> BoxFuture<'static, Response> {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let test_headers = req.headers().get_all("testheader").iter().count();
                let test_value = req.headers().get("testheader").cloned();
                let marker = req.headers().get("x-pre-marker").cloned();
                let body = req.into_body().collect().await.unwrap().to_bytes();

                let mut response = http::Response::new(Full::new(body.clone()));
                *response.status_mut() = StatusCode::OK;
                let headers = response.headers_mut();
                headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
                headers.insert("x-upstream-testheader-count", HeaderValue::from(test_headers));
                if let Some(value) = test_value {
                    headers.insert("x-upstream-testheader", value);
                }
                if let Some(marker) = marker {
                    headers.insert("x-upstream-pre-marker", marker);
                }
                response
            })
        }
    }
}

/// Request builder shorthand.
pub fn request(path: &str, headers: &[(&str, &str)], body: impl Into<Bytes>) -> Request {
    let mut builder = http::Request::builder().method("POST").uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Full::new(body.into())).unwrap()
}

/// Sends `request` through the pipeline of `api_id`.
pub async fn send(registry: &ApiRegistry, api_id: &str, request: Request, upstream: &Upstream) -> Response {
    let entry = registry.get(api_id).unwrap();
    entry
        .pipeline
        .process(MiddlewareContext::new(), request, upstream.handler())
        .await
}

/// Collects a response body.
pub async fn body(response: Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}
