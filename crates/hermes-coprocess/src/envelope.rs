//! Transaction envelope codec.
//!
//! A [`Transaction`] is the gateway's live view of one proxied call. For each
//! hook call it is encoded into an [`Envelope`], the JSON document hooks
//! receive and return. [`decode`] validates a returned envelope completely
//! before swapping its contents into the transaction, so a malformed reply
//! never leaves the transaction half-mutated.

use crate::error::DispatchError;
use crate::session::Session;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use hermes_core::{HookStage, Metadata};
use hermes_middleware::{Request, Response};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use http::{Extensions, Method, StatusCode, Uri, Version};
use http_body_util::{BodyExt, Full};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Response state captured after the upstream call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseState {
    /// Status code.
    pub status: StatusCode,
    /// Headers.
    pub headers: HeaderMap,
    /// Body.
    pub body: Bytes,
}

/// The live request (and, after the upstream call, response).
#[derive(Debug)]
pub struct Transaction {
    /// Request method.
    pub method: Method,
    /// Request URI.
    pub uri: Uri,
    /// HTTP version, carried through untouched.
    pub version: Version,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Bytes,
    /// Metadata threaded from hook to hook.
    pub metadata: Metadata,
    /// Response mirror, present once the upstream has answered.
    pub response: Option<ResponseState>,
    extensions: Extensions,
}

impl Transaction {
    /// Buffers `request` into a transaction.
    pub async fn from_request(request: Request) -> Self {
        let (parts, body) = request.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(never) => match never {},
        };
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            metadata: Metadata::new(),
            response: None,
            extensions: parts.extensions,
        }
    }

    /// Rebuilds the request to forward upstream.
    pub fn into_request(self) -> Request {
        let mut request = http::Request::new(Full::new(self.body));
        *request.method_mut() = self.method;
        *request.uri_mut() = self.uri;
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers;
        *request.extensions_mut() = self.extensions;
        request
    }

    /// Builds the request to forward upstream, keeping the transaction for
    /// the Response stage.
    ///
    /// Request extensions move to the forwarded request.
    pub fn forward_request(&mut self) -> Request {
        let mut request = http::Request::new(Full::new(self.body.clone()));
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers.clone();
        *request.extensions_mut() = std::mem::take(&mut self.extensions);
        request
    }

    /// Buffers an upstream response into the response mirror.
    pub async fn capture_response(&mut self, response: Response) {
        let (parts, body) = response.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(never) => match never {},
        };
        self.response = Some(ResponseState {
            status: parts.status,
            headers: parts.headers,
            body,
        });
    }

    /// Builds the client response from the response mirror.
    ///
    /// Returns `None` if no response has been captured.
    pub fn take_response(&mut self) -> Option<Response> {
        let state = self.response.take()?;
        let mut response = http::Response::new(Full::new(state.body));
        *response.status_mut() = state.status;
        *response.headers_mut() = state.headers;
        Some(response)
    }

    /// Request path without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// First value of a request header, if it is valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Percent-decoded value of the first query parameter called `name`.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(self.uri.query()?).ok()?;
        pairs.into_iter().find_map(|(key, value)| (key == name).then_some(value))
    }
}

/// Pipeline short-circuit requested by a hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReturnOverrides {
    /// Status to respond with.
    pub response_code: u16,
    /// Body to respond with.
    #[serde(default)]
    pub response_body: String,
    /// Headers to respond with.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Request section of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RequestSection {
    /// Method.
    pub method: String,
    /// Path and query.
    pub url: String,
    /// Header name → all values.
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    /// Headers with a value that is not UTF-8, every value base64 encoded.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub binary_headers: BTreeMap<String, Vec<String>>,
    /// Headers to set, replacing existing values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set_headers: BTreeMap<String, String>,
    /// Header names to remove.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete_headers: Vec<String>,
    /// Body, base64 on the wire.
    #[serde(default, with = "base64_body")]
    pub body: Bytes,
    /// Short-circuit response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_overrides: Option<ReturnOverrides>,
}

/// Response mirror, present at the Response stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResponseSection {
    /// Status code.
    pub status_code: u16,
    /// Header name → all values.
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    /// Headers with a value that is not UTF-8, every value base64 encoded.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub binary_headers: BTreeMap<String, Vec<String>>,
    /// Body, base64 on the wire.
    #[serde(default, with = "base64_body")]
    pub body: Bytes,
}

/// API facts handed to hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SpecSection {
    /// API id.
    pub api_id: String,
    /// Organisation id.
    pub org_id: String,
    /// Static per-API data. Empty when disabled.
    #[serde(default)]
    pub config_data: Metadata,
}

/// The document exchanged with a hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Stage being run; echoed back by the hook.
    pub stage: HookStage,
    /// Hook being called.
    pub hook_name: String,
    /// The request.
    pub request: RequestSection,
    /// Metadata carried across stages.
    #[serde(default)]
    pub metadata: Metadata,
    /// Current session, or the one an AuthCheck hook approves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    /// API facts.
    #[serde(default)]
    pub spec: SpecSection,
    /// Response mirror.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSection>,
}

impl Envelope {
    /// Serializes to the wire format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DispatchError> {
        serde_json::to_vec(self).map_err(|e| DispatchError::decode(e.to_string()))
    }

    /// Parses the wire format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DispatchError> {
        serde_json::from_slice(bytes).map_err(|e| DispatchError::decode(e.to_string()))
    }

    /// Largest body carried, request or response.
    #[must_use]
    pub fn largest_body(&self) -> usize {
        let response = self.response.as_ref().map_or(0, |r| r.body.len());
        self.request.body.len().max(response)
    }
}

/// Values the gateway contributes to an envelope besides the transaction.
#[derive(Debug, Clone, Default)]
pub struct EncodeSeed {
    /// API facts.
    pub spec: SpecSection,
    /// Session attached to the request, if any.
    pub session: Option<Session>,
    /// Extra metadata merged over the transaction's.
    pub metadata: Metadata,
}

/// Encodes `tx` for a call to `hook_name` at `stage`.
#[must_use]
pub fn encode(tx: &Transaction, stage: HookStage, hook_name: &str, seed: EncodeSeed) -> Envelope {
    let mut metadata = tx.metadata.clone();
    metadata.extend(seed.metadata);

    let response = if stage == HookStage::Response {
        tx.response.as_ref().map(|r| {
            let (headers, binary_headers) = header_map_to_wire(&r.headers);
            ResponseSection {
                status_code: r.status.as_u16(),
                headers,
                binary_headers,
                body: r.body.clone(),
            }
        })
    } else {
        None
    };

    let (headers, binary_headers) = header_map_to_wire(&tx.headers);
    Envelope {
        stage,
        hook_name: hook_name.to_string(),
        request: RequestSection {
            method: tx.method.to_string(),
            url: tx.uri.to_string(),
            headers,
            binary_headers,
            set_headers: BTreeMap::new(),
            delete_headers: Vec::new(),
            body: tx.body.clone(),
            return_overrides: None,
        },
        metadata,
        session: seed.session,
        spec: seed.spec,
        response,
    }
}

/// A validated short-circuit response.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    /// Status.
    pub status: StatusCode,
    /// Headers.
    pub headers: HeaderMap,
    /// Body.
    pub body: Bytes,
}

impl Override {
    /// Builds the client response.
    #[must_use]
    pub fn into_response(self) -> Response {
        let len = self.body.len();
        let mut response = http::Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
            .headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from(len));
        response
    }
}

/// What a hook reply carried besides transaction changes.
#[derive(Debug, Default)]
pub struct Decoded {
    /// Session the hook returned.
    pub session: Option<Session>,
    /// Short-circuit the hook requested.
    pub overrides: Option<Override>,
}

/// Applies a hook reply to `tx`.
///
/// Everything is validated and the replacement state built before any field
/// of `tx` changes. On error `tx` is untouched.
pub fn decode(
    envelope: Envelope,
    tx: &mut Transaction,
    expected: HookStage,
) -> Result<Decoded, DispatchError> {
    if envelope.stage != expected {
        return Err(DispatchError::decode(format!(
            "reply stage '{}' does not match '{expected}'",
            envelope.stage
        )));
    }

    let request = envelope.request;
    let method = Method::from_bytes(request.method.as_bytes())
        .map_err(|_| DispatchError::decode(format!("invalid method '{}'", request.method)))?;
    let uri: Uri = request
        .url
        .parse()
        .map_err(|_| DispatchError::decode(format!("invalid url '{}'", request.url)))?;

    let mut headers = wire_to_header_map(&request.headers, &request.binary_headers)?;
    for (name, value) in &request.set_headers {
        headers.insert(header_name(name)?, header_value(value)?);
    }
    for name in &request.delete_headers {
        headers.remove(header_name(name)?);
    }
    if headers.contains_key(CONTENT_LENGTH) {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(request.body.len()));
    }

    let response = match (expected, envelope.response) {
        (HookStage::Response, Some(mirror)) => {
            let status = StatusCode::from_u16(mirror.status_code).map_err(|_| {
                DispatchError::decode(format!("invalid status {}", mirror.status_code))
            })?;
            let mut headers = wire_to_header_map(&mirror.headers, &mirror.binary_headers)?;
            headers.insert(CONTENT_LENGTH, HeaderValue::from(mirror.body.len()));
            Some(ResponseState {
                status,
                headers,
                body: mirror.body,
            })
        }
        _ => tx.response.clone(),
    };

    let overrides = request
        .return_overrides
        .map(|o| {
            let status = StatusCode::from_u16(o.response_code).map_err(|_| {
                DispatchError::decode(format!("invalid override status {}", o.response_code))
            })?;
            let mut headers = HeaderMap::new();
            for (name, value) in &o.headers {
                headers.insert(header_name(name)?, header_value(value)?);
            }
            Ok::<_, DispatchError>(Override {
                status,
                headers,
                body: Bytes::from(o.response_body),
            })
        })
        .transpose()?;

    tx.method = method;
    tx.uri = uri;
    tx.headers = headers;
    tx.body = request.body;
    tx.metadata = envelope.metadata;
    tx.response = response;

    Ok(Decoded {
        session: envelope.session,
        overrides,
    })
}

type WireHeaders = BTreeMap<String, Vec<String>>;

/// Splits `headers` into text and base64 maps. A name goes to the base64
/// map whole when any of its values is not UTF-8, so value order survives.
fn header_map_to_wire(headers: &HeaderMap) -> (WireHeaders, WireHeaders) {
    let mut text = WireHeaders::new();
    let mut binary = WireHeaders::new();
    for name in headers.keys() {
        let values = headers.get_all(name);
        let utf8: Option<Vec<String>> = values
            .iter()
            .map(|v| std::str::from_utf8(v.as_bytes()).ok().map(str::to_string))
            .collect();
        match utf8 {
            Some(values) => {
                text.insert(name.as_str().to_string(), values);
            }
            None => {
                let encoded = values.iter().map(|v| BASE64.encode(v.as_bytes())).collect();
                binary.insert(name.as_str().to_string(), encoded);
            }
        }
    }
    (text, binary)
}

fn wire_to_header_map(text: &WireHeaders, binary: &WireHeaders) -> Result<HeaderMap, DispatchError> {
    let mut headers = HeaderMap::with_capacity(text.len() + binary.len());
    for (name, values) in text {
        let name = header_name(name)?;
        for value in values {
            headers.append(name.clone(), header_value(value)?);
        }
    }
    for (name, values) in binary {
        let name = header_name(name)?;
        for value in values {
            let raw = BASE64
                .decode(value)
                .map_err(|_| DispatchError::decode(format!("header '{name}' is not base64")))?;
            let value = HeaderValue::from_bytes(&raw)
                .map_err(|_| DispatchError::decode("invalid header value"))?;
            headers.append(name.clone(), value);
        }
    }
    Ok(headers)
}

fn header_name(name: &str) -> Result<HeaderName, DispatchError> {
    HeaderName::try_from(name)
        .map_err(|_| DispatchError::decode(format!("invalid header name '{name}'")))
}

fn header_value(value: &str) -> Result<HeaderValue, DispatchError> {
    HeaderValue::try_from(value).map_err(|_| DispatchError::decode("invalid header value"))
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn transaction() -> Transaction {
        let request = http::Request::builder()
            .method(Method::POST)
            .uri("/orders?key=abc&x=1")
            .header("content-type", "application/octet-stream")
            .header("x-multi", "a")
            .header("x-multi", "b")
            .body(Full::new(Bytes::from_static(&[0xff, 0x00, 0xfe])))
            .unwrap();
        Transaction::from_request(request).await
    }

    #[tokio::test]
    async fn test_encode_is_lossless() {
        let tx = transaction().await;
        let envelope = encode(&tx, HookStage::Pre, "tag", EncodeSeed::default());

        assert_eq!(envelope.request.method, "POST");
        assert_eq!(envelope.request.url, "/orders?key=abc&x=1");
        assert_eq!(envelope.request.headers["x-multi"], vec!["a", "b"]);
        assert_eq!(&envelope.request.body[..], &[0xff, 0x00, 0xfe]);
        assert!(envelope.response.is_none());

        let wire = envelope.to_bytes().unwrap();
        assert_eq!(Envelope::from_bytes(&wire).unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_non_utf8_header_survives_passthrough() {
        let mut tx = transaction().await;
        tx.headers
            .insert("x-bin", HeaderValue::from_bytes(&[0x61, 0xe9, 0x62]).unwrap());
        tx.headers
            .append("x-bin", HeaderValue::from_static("plain"));

        let envelope = encode(&tx, HookStage::Pre, "noop", EncodeSeed::default());
        assert!(!envelope.request.headers.contains_key("x-bin"));
        assert_eq!(envelope.request.binary_headers["x-bin"].len(), 2);

        let wire = envelope.to_bytes().unwrap();
        decode(Envelope::from_bytes(&wire).unwrap(), &mut tx, HookStage::Pre).unwrap();

        let values: Vec<&[u8]> = tx.headers.get_all("x-bin").iter().map(HeaderValue::as_bytes).collect();
        assert_eq!(values, vec![[0x61_u8, 0xe9, 0x62].as_slice(), b"plain".as_slice()]);
        assert_eq!(tx.headers.get_all("x-multi").iter().count(), 2);
    }

    #[tokio::test]
    async fn test_seed_metadata_merged() {
        let mut tx = transaction().await;
        tx.metadata.insert("from_tx".to_string(), "1".into());
        let mut seed = EncodeSeed::default();
        seed.metadata.insert("from_seed".to_string(), "2".into());

        let envelope = encode(&tx, HookStage::Pre, "tag", seed);
        assert_eq!(envelope.metadata.len(), 2);
    }

    #[tokio::test]
    async fn test_decode_applies_set_and_delete() {
        let mut tx = transaction().await;
        let mut envelope = encode(&tx, HookStage::Pre, "tag", EncodeSeed::default());
        envelope
            .request
            .set_headers
            .insert("Testheader".to_string(), "testvalue".to_string());
        envelope
            .request
            .set_headers
            .insert("x-multi".to_string(), "c".to_string());
        envelope.request.delete_headers.push("content-type".to_string());

        decode(envelope, &mut tx, HookStage::Pre).unwrap();

        assert_eq!(tx.headers.get_all("testheader").iter().count(), 1);
        assert_eq!(tx.header("testheader"), Some("testvalue"));
        assert_eq!(tx.headers.get_all("x-multi").iter().count(), 1);
        assert!(tx.header("content-type").is_none());
    }

    #[tokio::test]
    async fn test_malformed_reply_leaves_transaction_untouched() {
        let mut tx = transaction().await;
        let mut envelope = encode(&tx, HookStage::Pre, "tag", EncodeSeed::default());
        envelope.request.body = Bytes::from_static(b"changed");
        envelope
            .request
            .set_headers
            .insert("bad header".to_string(), "x".to_string());

        let err = decode(envelope, &mut tx, HookStage::Pre).unwrap_err();
        assert!(matches!(err, DispatchError::Decode(_)));
        assert_eq!(&tx.body[..], &[0xff, 0x00, 0xfe]);
        assert_eq!(tx.headers.get_all("x-multi").iter().count(), 2);
    }

    #[tokio::test]
    async fn test_stage_mismatch_is_malformed() {
        let mut tx = transaction().await;
        let envelope = encode(&tx, HookStage::Post, "tag", EncodeSeed::default());
        assert!(decode(envelope, &mut tx, HookStage::Pre).is_err());
    }

    #[tokio::test]
    async fn test_response_mirror_replacement() {
        let mut tx = transaction().await;
        let upstream = http::Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_LENGTH, "2")
            .body(Full::new(Bytes::from_static(b"ok")))
            .unwrap();
        tx.capture_response(upstream).await;

        let mut envelope = encode(&tx, HookStage::Response, "rewrite", EncodeSeed::default());
        let mirror = envelope.response.as_mut().unwrap();
        mirror.body = Bytes::from_static(b"newbody");
        mirror.status_code = 201;

        decode(envelope, &mut tx, HookStage::Response).unwrap();
        let response = tx.take_response().unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get(CONTENT_LENGTH).unwrap(), "7");
    }

    #[tokio::test]
    async fn test_return_overrides() {
        let mut tx = transaction().await;
        let mut envelope = encode(&tx, HookStage::Pre, "block", EncodeSeed::default());
        envelope.request.return_overrides = Some(ReturnOverrides {
            response_code: 418,
            response_body: "teapot".to_string(),
            headers: BTreeMap::from([("x-why".to_string(), "hook".to_string())]),
        });

        let decoded = decode(envelope, &mut tx, HookStage::Pre).unwrap();
        let response = decoded.overrides.unwrap().into_response();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(response.headers().get("x-why").unwrap(), "hook");
    }

    #[tokio::test]
    async fn test_query_param() {
        let tx = transaction().await;
        assert_eq!(tx.query_param("key").as_deref(), Some("abc"));
        assert_eq!(tx.query_param("missing"), None);
    }

    #[tokio::test]
    async fn test_round_trip_request() {
        let tx = transaction().await;
        let request = tx.into_request();
        assert_eq!(request.method(), Method::POST);
        let body = request.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], &[0xff, 0x00, 0xfe]);
    }
}
