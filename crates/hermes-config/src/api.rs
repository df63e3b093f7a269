//! API definitions.
//!
//! An [`ApiDefinition`] describes one proxied API: how callers authenticate,
//! which out-of-process hooks run at each [`HookStage`], and the static data
//! handed to those hooks. Definitions are read-only once loaded.

use std::collections::BTreeMap;

use hermes_core::{HookStage, MetaValue, Metadata};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Authentication mechanisms an API can enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// The AuthCheck hook authenticates the caller.
    CustomAuth,
    /// A bearer token looked up in the session store.
    AuthToken,
}

impl AuthType {
    /// Returns the wire name of this mechanism.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CustomAuth => "custom_auth",
            Self::AuthToken => "auth_token",
        }
    }
}

/// Which transport carries hook calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// JSON envelopes POSTed to the configured dispatch endpoint.
    #[default]
    Http,
    /// Handlers registered in the gateway process.
    InProcess,
}

/// Where an auth mechanism reads its credential from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Request header holding the credential.
    #[serde(default = "default_auth_header")]
    pub auth_header_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_header_name: default_auth_header(),
        }
    }
}

fn default_auth_header() -> String {
    "Authorization".to_string()
}

/// Per-mechanism overrides of [`ApiDefinition::auth`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct AuthConfigs {
    /// Settings for [`AuthType::AuthToken`].
    #[serde(default)]
    pub auth_token: Option<AuthConfig>,
    /// Settings for [`AuthType::CustomAuth`].
    #[serde(default)]
    pub custom_auth: Option<AuthConfig>,
}

/// One hook registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HookDescriptor {
    /// Symbolic name the driver resolves to an implementation.
    pub name: String,

    /// Skip this hook when no session is attached (Post and Response only).
    #[serde(default)]
    pub require_session: bool,

    /// Overrides [`MiddlewareSection::driver`] for this hook.
    #[serde(default)]
    pub driver: Option<DriverKind>,
}

impl HookDescriptor {
    /// Creates a descriptor with default options.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            require_session: false,
            driver: None,
        }
    }
}

/// Where the identity extractor reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractFrom {
    /// A request header; needs `header_name`.
    #[default]
    Header,
    /// A query parameter; needs `param_name`.
    Query,
    /// The whole request body.
    Body,
}

/// How the identity extractor turns the source into a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractWith {
    /// The source value verbatim.
    #[default]
    Value,
    /// A capture group of `regex_expression`.
    Regex,
}

/// Identity extractor settings for the AuthCheck stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct IdExtractorConfig {
    /// When `true` the raw credential is the session key.
    #[serde(default)]
    pub disabled: bool,

    /// Source of the credential.
    #[serde(default)]
    pub extract_from: ExtractFrom,

    /// Extraction strategy.
    #[serde(default)]
    pub extract_with: ExtractWith,

    /// Strategy parameters (`header_name`, `param_name`, `regex_expression`, `regex_match_index`).
    #[serde(default)]
    pub extractor_config: BTreeMap<String, MetaValue>,
}

impl Default for IdExtractorConfig {
    fn default() -> Self {
        Self {
            disabled: true,
            extract_from: ExtractFrom::Header,
            extract_with: ExtractWith::Value,
            extractor_config: BTreeMap::new(),
        }
    }
}

impl IdExtractorConfig {
    /// Header extractor reading `header_name` verbatim.
    pub fn header(header_name: impl Into<String>) -> Self {
        let mut extractor_config = BTreeMap::new();
        extractor_config.insert(
            "header_name".to_string(),
            MetaValue::String(header_name.into()),
        );
        Self {
            disabled: false,
            extract_from: ExtractFrom::Header,
            extract_with: ExtractWith::Value,
            extractor_config,
        }
    }

    /// Returns a string parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.extractor_config.get(key).and_then(MetaValue::as_str)
    }
}

/// Hooks and driver for one API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct MiddlewareSection {
    /// Default transport for every hook of this API.
    #[serde(default)]
    pub driver: DriverKind,

    /// Hooks run before authentication, in order.
    #[serde(default)]
    pub pre: Vec<HookDescriptor>,

    /// The authoritative authentication hook.
    #[serde(default)]
    pub auth_check: Option<HookDescriptor>,

    /// Hooks run after authentication, in order.
    #[serde(default)]
    pub post: Vec<HookDescriptor>,

    /// Hooks run on the upstream response, in order.
    #[serde(default)]
    pub response: Vec<HookDescriptor>,

    /// Identity extractor used with the AuthCheck hook.
    #[serde(default)]
    pub id_extractor: IdExtractorConfig,
}

impl MiddlewareSection {
    /// Returns the hooks registered for `stage` in declared order.
    #[must_use]
    pub fn hooks(&self, stage: HookStage) -> &[HookDescriptor] {
        match stage {
            HookStage::Pre => &self.pre,
            HookStage::AuthCheck => self.auth_check.as_slice(),
            HookStage::Post => &self.post,
            HookStage::Response => &self.response,
        }
    }

    /// Returns the driver a hook runs on.
    #[must_use]
    pub fn driver_for(&self, hook: &HookDescriptor) -> DriverKind {
        hook.driver.unwrap_or(self.driver)
    }
}

/// A path that bypasses authentication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IgnoredPath {
    /// Path relative to the API's listen path, e.g. `/health`.
    pub path: String,
    /// Compare case-insensitively.
    #[serde(default)]
    pub ignore_case: bool,
}

impl IgnoredPath {
    /// Returns `true` if `request_path` matches this entry exactly or as a
    /// path prefix followed by `/`.
    #[must_use]
    pub fn matches(&self, request_path: &str) -> bool {
        let (pattern, path) = if self.ignore_case {
            (self.path.to_ascii_lowercase(), request_path.to_ascii_lowercase())
        } else {
            (self.path.clone(), request_path.to_string())
        };
        path == pattern
            || path
                .strip_prefix(&pattern)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// One proxied API.
///
/// # Example
///
/// ```
/// use hermes_config::ApiDefinition;
///
/// let api: ApiDefinition = serde_json::from_str(r#"{
///     "api_id": "orders",
///     "org_id": "acme",
///     "use_keyless": true,
///     "custom_middleware": { "driver": "in_process", "pre": [{ "name": "tag" }] }
/// }"#).unwrap();
///
/// assert!(!api.requires_auth());
/// assert_eq!(api.custom_middleware.pre[0].name, "tag");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ApiDefinition {
    /// Unique API id.
    pub api_id: String,

    /// Owning organisation; namespaces derived session keys.
    pub org_id: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Skip authentication entirely.
    #[serde(default)]
    pub use_keyless: bool,

    /// Enable standard token auth next to custom auth.
    #[serde(default)]
    pub use_standard_auth: bool,

    /// Authenticate with the AuthCheck hook.
    #[serde(default)]
    pub enable_coprocess_auth: bool,

    /// Mechanism whose session is the session of record when several are enabled.
    #[serde(default)]
    pub base_identity_provided_by: Option<AuthType>,

    /// Default credential location.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Per-mechanism credential locations.
    #[serde(default)]
    pub auth_configs: AuthConfigs,

    /// Hook registrations.
    #[serde(default)]
    pub custom_middleware: MiddlewareSection,

    /// Static data passed to every hook.
    #[serde(default)]
    pub config_data: Metadata,

    /// Hide [`config_data`](Self::config_data) from hooks.
    #[serde(default)]
    pub config_data_disabled: bool,

    /// Headers added to every response; values may reference `$tyk_meta.<key>`.
    #[serde(default)]
    pub global_response_headers: BTreeMap<String, String>,

    /// Paths that skip authentication.
    #[serde(default)]
    pub ignored_paths: Vec<IgnoredPath>,
}

impl ApiDefinition {
    /// Creates a keyless definition with no hooks.
    pub fn new(api_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            api_id: api_id.into(),
            org_id: org_id.into(),
            name: String::new(),
            use_keyless: true,
            use_standard_auth: false,
            enable_coprocess_auth: false,
            base_identity_provided_by: None,
            auth: AuthConfig::default(),
            auth_configs: AuthConfigs::default(),
            custom_middleware: MiddlewareSection::default(),
            config_data: Metadata::new(),
            config_data_disabled: false,
            global_response_headers: BTreeMap::new(),
            ignored_paths: Vec::new(),
        }
    }

    /// Returns `true` unless the API is keyless.
    #[must_use]
    pub const fn requires_auth(&self) -> bool {
        !self.use_keyless
    }

    /// Enabled mechanisms, custom auth first.
    ///
    /// An API that requires auth without enabling the AuthCheck hook falls
    /// back to token auth.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<AuthType> {
        if !self.requires_auth() {
            return Vec::new();
        }
        let mut mechanisms = Vec::with_capacity(2);
        if self.enable_coprocess_auth {
            mechanisms.push(AuthType::CustomAuth);
        }
        if self.use_standard_auth || !self.enable_coprocess_auth {
            mechanisms.push(AuthType::AuthToken);
        }
        mechanisms
    }

    /// The mechanism that supplies the session of record.
    ///
    /// Falls back to token auth when standard auth is on, otherwise custom auth.
    #[must_use]
    pub fn base_identity(&self) -> Option<AuthType> {
        let mechanisms = self.auth_mechanisms();
        match self.base_identity_provided_by {
            Some(base) if mechanisms.contains(&base) => Some(base),
            _ if mechanisms.contains(&AuthType::AuthToken) && self.use_standard_auth => {
                Some(AuthType::AuthToken)
            }
            _ => mechanisms.first().copied(),
        }
    }

    /// Header a mechanism reads its credential from.
    #[must_use]
    pub fn auth_header(&self, mechanism: AuthType) -> &str {
        let specific = match mechanism {
            AuthType::AuthToken => self.auth_configs.auth_token.as_ref(),
            AuthType::CustomAuth => self.auth_configs.custom_auth.as_ref(),
        };
        specific.unwrap_or(&self.auth).auth_header_name.as_str()
    }

    /// Returns `true` if `path` skips authentication.
    #[must_use]
    pub fn is_ignored_path(&self, path: &str) -> bool {
        self.ignored_paths.iter().any(|p| p.matches(path))
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if ids are empty, custom auth lacks an AuthCheck
    /// hook, the base identity names a disabled mechanism, a hook is declared
    /// twice in one stage, or the identity extractor lacks its parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_id.trim().is_empty() {
            return Err(ConfigError::missing_field("api_id"));
        }
        if self.org_id.trim().is_empty() {
            return Err(ConfigError::missing_field(format!("{}.org_id", self.api_id)));
        }

        let section = &self.custom_middleware;
        if self.enable_coprocess_auth && !self.use_keyless && section.auth_check.is_none() {
            return Err(ConfigError::validation_error(format!(
                "API '{}' enables custom auth but declares no auth_check hook",
                self.api_id
            )));
        }

        if let Some(base) = self.base_identity_provided_by {
            if self.requires_auth() && !self.auth_mechanisms().contains(&base) {
                return Err(ConfigError::invalid_value(
                    format!("{}.base_identity_provided_by", self.api_id),
                    format!("mechanism '{}' is not enabled", base.name()),
                ));
            }
        }

        for stage in HookStage::ALL {
            let hooks = section.hooks(stage);
            for (i, hook) in hooks.iter().enumerate() {
                if hook.name.trim().is_empty() {
                    return Err(ConfigError::missing_field(format!(
                        "{}.custom_middleware.{stage}[{i}].name",
                        self.api_id
                    )));
                }
                if hooks[..i].iter().any(|h| h.name == hook.name) {
                    return Err(ConfigError::invalid_value(
                        format!("{}.custom_middleware.{stage}", self.api_id),
                        format!("hook '{}' declared twice", hook.name),
                    ));
                }
            }
        }

        let extractor = &section.id_extractor;
        if !extractor.disabled {
            let required = match extractor.extract_from {
                ExtractFrom::Header => Some("header_name"),
                ExtractFrom::Query => Some("param_name"),
                ExtractFrom::Body => None,
            };
            if let Some(param) = required {
                if extractor.param(param).is_none() {
                    return Err(ConfigError::missing_field(format!(
                        "{}.custom_middleware.id_extractor.extractor_config.{param}",
                        self.api_id
                    )));
                }
            }
            if extractor.extract_with == ExtractWith::Regex
                && extractor.param("regex_expression").is_none()
            {
                return Err(ConfigError::missing_field(format!(
                    "{}.custom_middleware.id_extractor.extractor_config.regex_expression",
                    self.api_id
                )));
            }
        }

        Ok(())
    }
}
