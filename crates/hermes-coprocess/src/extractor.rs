//! Identity extraction for the AuthCheck stage.
//!
//! A [`CredentialExtractor`] reads the credential from the request source an
//! API names and turns it into a session key. With extraction disabled the
//! raw credential is the key; otherwise the key is derived with
//! [`generate_session_id`] so equal credentials from different orgs never
//! collide.

use crate::envelope::Transaction;
use crate::error::DispatchError;
use hermes_config::{ConfigError, ExtractFrom, ExtractWith, IdExtractorConfig};
use hermes_core::MetaValue;
use regex::Regex;
use std::borrow::Cow;
use sha1::{Digest, Sha1};
use std::fmt::Write as _;

/// Derives a session key from a credential, scoped to `org_id`.
///
/// ```
/// use hermes_coprocess::extractor::generate_session_id;
///
/// let key = generate_session_id("default", "abc");
/// assert_eq!(key, "defaulta9993e364706816aba3e25717850c26c9cd0d89d");
/// ```
#[must_use]
pub fn generate_session_id(org_id: &str, credential: &str) -> String {
    let digest = Sha1::digest(credential.as_bytes());
    let mut key = String::with_capacity(org_id.len() + digest.len() * 2);
    key.push_str(org_id);
    for byte in digest {
        let _ = write!(key, "{byte:02x}");
    }
    key
}

/// Turns a raw source value into the identity.
pub trait IdExtractor: Send + Sync + std::fmt::Debug {
    /// Returns the identity, or `None` when the value holds none.
    fn extract(&self, raw: &str) -> Option<String>;
}

/// Uses the source value verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueExtractor;

impl IdExtractor for ValueExtractor {
    fn extract(&self, raw: &str) -> Option<String> {
        (!raw.is_empty()).then(|| raw.to_string())
    }
}

/// Uses one match of a regular expression.
///
/// Index 0 is the whole match; higher indices are capture groups.
#[derive(Debug, Clone)]
pub struct RegexExtractor {
    regex: Regex,
    index: usize,
}

impl RegexExtractor {
    /// Compiles `expression`.
    pub fn new(expression: &str, index: usize) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(expression)?,
            index,
        })
    }
}

impl IdExtractor for RegexExtractor {
    fn extract(&self, raw: &str) -> Option<String> {
        self.regex
            .captures(raw)?
            .get(self.index)
            .map(|m| m.as_str().to_string())
    }
}

/// Where a credential is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// A request header.
    Header(String),
    /// A query parameter.
    Query(String),
    /// The whole body as UTF-8.
    Body,
}

impl CredentialSource {
    /// Name used in the missing-source message.
    #[must_use]
    pub fn field_name(&self) -> &str {
        match self {
            Self::Header(name) | Self::Query(name) => name,
            Self::Body => "body",
        }
    }

    fn read<'a>(&self, tx: &'a Transaction) -> Option<Cow<'a, str>> {
        let value = match self {
            Self::Header(name) => tx.header(name).map(Cow::Borrowed),
            Self::Query(name) => tx.query_param(name).map(Cow::Owned),
            Self::Body => std::str::from_utf8(&tx.body).ok().map(Cow::Borrowed),
        }?;
        (!value.is_empty()).then_some(value)
    }
}

/// Result of a successful extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    /// The credential as found in the request.
    pub credential: String,
    /// Key the session is stored under.
    pub session_key: String,
    /// `true` when the key was derived rather than taken verbatim.
    pub derived: bool,
}

/// Reads and keys the AuthCheck credential for one API.
#[derive(Debug)]
pub struct CredentialExtractor {
    disabled: bool,
    source: CredentialSource,
    strategy: Box<dyn IdExtractor>,
}

impl CredentialExtractor {
    /// Builds the extractor for `config`.
    ///
    /// `auth_header` is the custom auth header, read when extraction is
    /// disabled.
    pub fn from_config(config: &IdExtractorConfig, auth_header: &str) -> Result<Self, ConfigError> {
        if config.disabled {
            return Ok(Self {
                disabled: true,
                source: CredentialSource::Header(auth_header.to_string()),
                strategy: Box::new(ValueExtractor),
            });
        }

        let source = match config.extract_from {
            ExtractFrom::Header => CredentialSource::Header(
                config
                    .param("header_name")
                    .unwrap_or(auth_header)
                    .to_string(),
            ),
            ExtractFrom::Query => CredentialSource::Query(
                config
                    .param("param_name")
                    .ok_or_else(|| ConfigError::missing_field("id_extractor.param_name"))?
                    .to_string(),
            ),
            ExtractFrom::Body => CredentialSource::Body,
        };

        let strategy: Box<dyn IdExtractor> = match config.extract_with {
            ExtractWith::Value => Box::new(ValueExtractor),
            ExtractWith::Regex => {
                let expression = config
                    .param("regex_expression")
                    .ok_or_else(|| ConfigError::missing_field("id_extractor.regex_expression"))?;
                let index = match config.extractor_config.get("regex_match_index") {
                    None => 0,
                    Some(MetaValue::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => {
                        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                        let index = *n as usize;
                        index
                    }
                    Some(other) => {
                        return Err(ConfigError::invalid_value(
                            "id_extractor.regex_match_index",
                            format!("expected a non-negative integer, got {other}"),
                        ))
                    }
                };
                let extractor = RegexExtractor::new(expression, index).map_err(|e| {
                    ConfigError::invalid_value("id_extractor.regex_expression", e.to_string())
                })?;
                Box::new(extractor)
            }
        };

        Ok(Self {
            disabled: false,
            source,
            strategy,
        })
    }

    /// Returns `true` when the raw credential is the session key.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// The source read from.
    #[must_use]
    pub const fn source(&self) -> &CredentialSource {
        &self.source
    }

    /// Extracts the credential and its session key from `tx`.
    pub fn extract(&self, tx: &Transaction, org_id: &str) -> Result<Extracted, DispatchError> {
        let missing = || DispatchError::missing(self.source.field_name());
        let raw = self.source.read(tx).ok_or_else(missing)?;

        if self.disabled {
            return Ok(Extracted {
                credential: raw.to_string(),
                session_key: raw.to_string(),
                derived: false,
            });
        }

        let identity = self.strategy.extract(&raw).ok_or_else(missing)?;
        Ok(Extracted {
            session_key: generate_session_id(org_id, &identity),
            credential: identity,
            derived: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;

    async fn tx(uri: &str, auth: Option<&str>, body: &'static str) -> Transaction {
        let mut builder = http::Request::builder().uri(uri);
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        let request = builder.body(Full::new(Bytes::from_static(body.as_bytes()))).unwrap();
        Transaction::from_request(request).await
    }

    #[test]
    fn test_generate_session_id_is_org_scoped() {
        let a = generate_session_id("org1", "abc");
        let b = generate_session_id("org2", "abc");
        assert_ne!(a, b);
        assert!(a.starts_with("org1"));
        assert_eq!(a.len(), 4 + 40);
    }

    #[tokio::test]
    async fn test_disabled_uses_raw_credential() {
        let extractor =
            CredentialExtractor::from_config(&IdExtractorConfig::default(), "Authorization")
                .unwrap();
        let extracted = extractor
            .extract(&tx("/", Some("abc"), "").await, "default")
            .unwrap();
        assert_eq!(extracted.session_key, "abc");
        assert!(!extracted.derived);
    }

    #[tokio::test]
    async fn test_header_value_derives_key() {
        let extractor = CredentialExtractor::from_config(
            &IdExtractorConfig::header("Authorization"),
            "Authorization",
        )
        .unwrap();
        let extracted = extractor
            .extract(&tx("/", Some("abc"), "").await, "default")
            .unwrap();
        assert_eq!(extracted.session_key, generate_session_id("default", "abc"));
        assert_eq!(extracted.credential, "abc");
    }

    #[tokio::test]
    async fn test_missing_header() {
        let extractor = CredentialExtractor::from_config(
            &IdExtractorConfig::header("Authorization"),
            "Authorization",
        )
        .unwrap();
        let err = extractor
            .extract(&tx("/", None, "").await, "default")
            .unwrap_err();
        assert_eq!(err.to_string(), "Authorization field missing");
    }

    #[tokio::test]
    async fn test_query_source() {
        let mut config = IdExtractorConfig::header("unused");
        config.extract_from = ExtractFrom::Query;
        config
            .extractor_config
            .insert("param_name".to_string(), MetaValue::from("api_key"));
        let extractor = CredentialExtractor::from_config(&config, "Authorization").unwrap();

        let found = extractor
            .extract(&tx("/x?api_key=k1", None, "").await, "o")
            .unwrap();
        assert_eq!(found.credential, "k1");

        let err = extractor.extract(&tx("/x", None, "").await, "o").unwrap_err();
        assert_eq!(err.to_string(), "api_key field missing");
    }

    #[tokio::test]
    async fn test_query_credential_is_percent_decoded() {
        let mut config = IdExtractorConfig::header("unused");
        config.extract_from = ExtractFrom::Query;
        config
            .extractor_config
            .insert("param_name".to_string(), MetaValue::from("api_key"));
        let extractor = CredentialExtractor::from_config(&config, "Authorization").unwrap();

        let found = extractor
            .extract(&tx("/x?page=1&api_key=a%2Bb%20c", None, "").await, "o")
            .unwrap();
        assert_eq!(found.credential, "a+b c");
        assert_eq!(found.session_key, generate_session_id("o", "a+b c"));
    }

    #[tokio::test]
    async fn test_body_regex_source() {
        let mut config = IdExtractorConfig::header("unused");
        config.extract_from = ExtractFrom::Body;
        config.extract_with = ExtractWith::Regex;
        config.extractor_config.insert(
            "regex_expression".to_string(),
            MetaValue::from(r"token=(\w+)"),
        );
        config
            .extractor_config
            .insert("regex_match_index".to_string(), MetaValue::from(1_i64));
        let extractor = CredentialExtractor::from_config(&config, "Authorization").unwrap();

        let found = extractor
            .extract(&tx("/", None, "user=x&token=t0k3n").await, "o")
            .unwrap();
        assert_eq!(found.credential, "t0k3n");

        let err = extractor
            .extract(&tx("/", None, "nothing here").await, "o")
            .unwrap_err();
        assert!(matches!(err, DispatchError::MissingSource { .. }));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let mut config = IdExtractorConfig::header("unused");
        config.extract_with = ExtractWith::Regex;
        config
            .extractor_config
            .insert("regex_expression".to_string(), MetaValue::from("("));
        assert!(CredentialExtractor::from_config(&config, "Authorization").is_err());
    }
}
