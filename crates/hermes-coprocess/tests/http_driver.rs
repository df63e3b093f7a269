//! The HTTP driver against a hook server on an ephemeral port.

mod support;

use bytes::Bytes;
use hermes_config::{ApiDefinition, CoprocessConfig, DriverKind, HookDescriptor};
use hermes_coprocess::driver::{Drivers, HttpDriver, HOOK_NAME_HEADER};
use hermes_coprocess::{ApiRegistry, DispatchError, Envelope, HookTransport, MemorySessionStore};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use support::{body, request, send, Upstream, ORG};
use tokio::net::TcpListener;

async fn dispatch(
    req: hyper::Request<Incoming>,
) -> Result<hyper::Response<Full<Bytes>>, Infallible> {
    let hook = req
        .headers()
        .get(HOOK_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let payload = req.into_body().collect().await.unwrap().to_bytes();

    let (status, reply) = match hook.as_str() {
        "testPreHook1" => {
            let mut envelope = Envelope::from_bytes(&payload).unwrap();
            envelope
                .request
                .set_headers
                .insert("Testheader".to_string(), "testvalue".to_string());
            (StatusCode::OK, Bytes::from(envelope.to_bytes().unwrap()))
        }
        "echoHook" => (StatusCode::OK, payload),
        "garbageHook" => (StatusCode::OK, Bytes::from_static(b"not an envelope")),
        "hugeHook" => (StatusCode::OK, Bytes::from(vec![b'x'; 64 * 1024])),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, Bytes::new()),
    };

    let mut response = hyper::Response::new(Full::new(reply));
    *response.status_mut() = status;
    Ok(response)
}

async fn spawn_hook_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(dispatch))
                    .await;
            });
        }
    });
    addr
}

fn config_for(addr: SocketAddr) -> CoprocessConfig {
    let mut config = CoprocessConfig::default();
    config.http.endpoint = Some(format!("http://{addr}/dispatch"));
    config
}

fn http_gateway(config: &CoprocessConfig, pre: &str) -> ApiRegistry {
    let driver = HttpDriver::from_config(config).unwrap().unwrap();
    let registry = ApiRegistry::new(
        config,
        Drivers::new().with(driver),
        Arc::new(MemorySessionStore::new()),
    );

    let mut api = ApiDefinition::new("remote", ORG);
    api.custom_middleware.driver = DriverKind::Http;
    api.custom_middleware.pre.push(HookDescriptor::named(pre));
    registry.reload(vec![api]).unwrap();
    registry
}

#[tokio::test]
async fn test_remote_pre_hook_modifies_request() {
    let config = config_for(spawn_hook_server().await);
    let registry = http_gateway(&config, "testPreHook1");
    let upstream = Upstream::default();

    let response = send(&registry, "remote", request("/", &[], "payload"), &upstream).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-upstream-testheader-count"], "1");
    assert_eq!(body(response).await.as_ref(), b"payload");
}

#[tokio::test]
async fn test_unchanged_envelope_forwards_request() {
    let config = config_for(spawn_hook_server().await);
    let registry = http_gateway(&config, "echoHook");
    let upstream = Upstream::default();

    let response = send(&registry, "remote", request("/items?page=2", &[], ""), &upstream).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test]
async fn test_error_status_fails_closed() {
    let config = config_for(spawn_hook_server().await);
    let registry = http_gateway(&config, "brokenHook");
    let upstream = Upstream::default();

    let response = send(&registry, "remote", request("/", &[], ""), &upstream).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn test_undecodable_reply_fails_closed() {
    let config = config_for(spawn_hook_server().await);
    let registry = http_gateway(&config, "garbageHook");
    let upstream = Upstream::default();

    let response = send(&registry, "remote", request("/", &[], ""), &upstream).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn test_oversize_reply_is_rejected() {
    let mut config = config_for(spawn_hook_server().await);
    config.max_message_size = 1024;
    let driver = HttpDriver::from_config(&config).unwrap().unwrap();

    let err = driver
        .exchange("hugeHook", Bytes::from_static(b"{}"))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Oversize { limit: 1024, .. }));
}
