//! JSON envelopes over HTTP.
//!
//! Every hook call is a `POST` of the encoded envelope to one dispatch
//! endpoint; the hook name travels in [`HOOK_NAME_HEADER`]. The hook server
//! answers `2xx` with the modified envelope. Anything else is a remote error.

use super::HookTransport;
use crate::error::DispatchError;
use bytes::{Bytes, BytesMut};
use hermes_config::CoprocessConfig;
use hermes_middleware::BoxFuture;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;

/// Header naming the hook being called.
pub const HOOK_NAME_HEADER: &str = "x-hermes-hook";

/// HTTP hook transport.
#[derive(Debug, Clone)]
pub struct HttpDriver {
    client: Client,
    endpoint: String,
    max_message_size: usize,
}

impl HttpDriver {
    /// Creates a driver for `endpoint` with the pool and limits in `config`.
    pub fn new(endpoint: impl Into<String>, config: &CoprocessConfig) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.http.connect_timeout_ms))
            .pool_max_idle_per_host(config.http.pool_max_idle_per_host)
            .build()
            .map_err(DispatchError::remote)?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            max_message_size: config.max_message_size,
        })
    }

    /// Creates a driver from `config.http.endpoint`, if one is configured.
    pub fn from_config(config: &CoprocessConfig) -> Result<Option<Self>, DispatchError> {
        config
            .http
            .endpoint
            .as_deref()
            .map(|endpoint| Self::new(endpoint, config))
            .transpose()
    }

    /// The dispatch endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn check_size(&self, size: usize) -> Result<(), DispatchError> {
        if size >= self.max_message_size {
            return Err(DispatchError::Oversize {
                size,
                limit: self.max_message_size,
            });
        }
        Ok(())
    }
}

impl HookTransport for HttpDriver {
    fn exchange<'a>(
        &'a self,
        hook: &'a str,
        payload: Bytes,
    ) -> BoxFuture<'a, Result<Bytes, DispatchError>> {
        Box::pin(async move {
            let mut response = self
                .client
                .post(&self.endpoint)
                .header(CONTENT_TYPE, "application/json")
                .header(HOOK_NAME_HEADER, hook)
                .body(payload)
                .send()
                .await
                .map_err(DispatchError::remote)?;

            let status = response.status();
            if !status.is_success() {
                return Err(DispatchError::remote(format!(
                    "hook endpoint answered {status}"
                )));
            }

            if let Some(len) = response.content_length() {
                self.check_size(usize::try_from(len).unwrap_or(usize::MAX))?;
            }

            // Chunked replies carry no length up front; stop at the ceiling.
            let mut body = BytesMut::new();
            while let Some(chunk) = response.chunk().await.map_err(DispatchError::remote)? {
                self.check_size(body.len() + chunk.len())?;
                body.extend_from_slice(&chunk);
            }
            Ok(body.freeze())
        })
    }
}
