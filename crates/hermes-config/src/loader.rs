//! Configuration loaders.
//!
//! [`ConfigLoader`] builds a [`GatewayConfig`] from layered sources and
//! [`ApiDefinitionLoader`] reads a directory of [`ApiDefinition`] files.

use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::{ApiDefinition, ConfigError, GatewayConfig, LogFormat};

/// Gateway configuration loader.
///
/// Layers, later overriding earlier:
/// 1. Defaults (or a preset)
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables `PREFIX__SECTION__KEY`
///
/// # Example
///
/// ```no_run
/// use hermes_config::ConfigLoader;
///
/// # fn main() -> Result<(), hermes_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("hermes.toml")?
///     .with_env_prefix("HERMES")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: GatewayConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a loader seeded with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
            env_prefix: None,
        }
    }

    /// Start from the development preset.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = GatewayConfig::development();
        self
    }

    /// Start from the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = GatewayConfig::production();
        self
    }

    /// Load configuration from a `.toml` or `.json` file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing, unreadable, malformed or
    /// contains unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        self.config = read_typed(path.as_ref())?;
        Ok(self)
    }

    /// Like [`with_file`](Self::with_file) but a missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be parsed.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in the given format (`toml` or `json`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails.
    ///
    /// # Example
    ///
    /// ```
    /// use hermes_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[coprocess]\nhook_timeout_ms = 250", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.coprocess.hook_timeout_ms, 250);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = parse_typed(content, format)?;
        Ok(self)
    }

    /// Set the environment variable prefix for overrides.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment if one exists.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        dotenvy::dotenv().ok();
        self
    }

    /// Apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override does not parse or validation fails.
    pub fn load(mut self) -> Result<GatewayConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars: HashMap<String, String> = env::vars()
                .filter(|(k, _)| k.starts_with(&prefix))
                .collect();
            for (key, value) in vars {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Finalize without validation.
    #[must_use]
    pub fn load_unvalidated(self) -> GatewayConfig {
        self.config
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let rest = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;
        let parts: Vec<&str> = rest.split("__").collect();

        let coprocess = &mut self.config.coprocess;
        let telemetry = &mut self.config.telemetry;

        match parts.as_slice() {
            ["COPROCESS", "MAX_MESSAGE_SIZE"] => {
                coprocess.max_message_size = parse_num(key, value)?;
            }
            ["COPROCESS", "HOOK_TIMEOUT_MS"] => {
                coprocess.hook_timeout_ms = parse_num(key, value)?;
            }
            ["COPROCESS", "REQUEST_TIMEOUT_MS"] => {
                coprocess.request_timeout_ms = parse_num(key, value)?;
            }
            ["COPROCESS", "HTTP", "ENDPOINT"] => {
                coprocess.http.endpoint = (!value.is_empty()).then(|| value.to_string());
            }
            ["COPROCESS", "HTTP", "CONNECT_TIMEOUT_MS"] => {
                coprocess.http.connect_timeout_ms = parse_num(key, value)?;
            }
            ["COPROCESS", "HTTP", "POOL_MAX_IDLE_PER_HOST"] => {
                coprocess.http.pool_max_idle_per_host = parse_num(key, value)?;
            }

            ["TELEMETRY", "SERVICE_NAME"] => telemetry.service_name = value.to_string(),
            ["TELEMETRY", "ENVIRONMENT"] => telemetry.environment = value.to_string(),
            ["TELEMETRY", "METRICS", "ENABLED"] => {
                telemetry.metrics.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }
            ["TELEMETRY", "METRICS", "ADDR"] => telemetry.metrics.addr = value.to_string(),
            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                telemetry.logging.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => telemetry.logging.level = value.to_string(),
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["TELEMETRY", "LOGGING", "ANSI_ENABLED"] => {
                telemetry.logging.ansi_enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }

            _ => {}
        }

        Ok(())
    }
}

/// Loads every API definition in a directory.
///
/// Files ending in `.json` or `.toml` are read in file-name order, one
/// definition per file. Each definition is validated and ids must be unique.
#[derive(Debug, Clone)]
pub struct ApiDefinitionLoader {
    dir: PathBuf,
}

impl ApiDefinitionLoader {
    /// Creates a loader for `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Reads and validates all definitions.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the directory cannot be read, a file fails to
    /// parse or validate, or two files share an `api_id`.
    pub fn load(&self) -> Result<Vec<ApiDefinition>, ConfigError> {
        if !self.dir.is_dir() {
            return Err(ConfigError::file_not_found(&self.dir));
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && format_of(&path).is_some() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut seen = HashSet::new();
        let mut definitions = Vec::with_capacity(paths.len());
        for path in paths {
            let api: ApiDefinition = read_typed(&path)?;
            api.validate()?;
            if !seen.insert(api.api_id.clone()) {
                return Err(ConfigError::DuplicateApi {
                    api_id: api.api_id,
                    path,
                });
            }
            definitions.push(api);
        }
        Ok(definitions)
    }

    /// Parses one definition from a string in the given format.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing or validation fails.
    pub fn parse(content: &str, format: &str) -> Result<ApiDefinition, ConfigError> {
        let api: ApiDefinition = parse_typed(content, format)?;
        api.validate()?;
        Ok(api)
    }
}

fn format_of(path: &Path) -> Option<&'static str> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("toml") => Some("toml"),
        Some("json") => Some("json"),
        _ => None,
    }
}

fn read_typed<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::file_not_found(path));
    }
    let format = format_of(path).ok_or_else(|| {
        ConfigError::validation_error(format!(
            "unsupported configuration file format: {}",
            path.display()
        ))
    })?;
    let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
    parse_typed(&content, format)
}

fn parse_typed<T: DeserializeOwned>(content: &str, format: &str) -> Result<T, ConfigError> {
    match format.to_lowercase().as_str() {
        "toml" => Ok(toml::from_str(content)?),
        "json" => Ok(serde_json::from_str(content)?),
        _ => Err(ConfigError::validation_error(format!(
            "unsupported configuration format: {format}"
        ))),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_loader_defaults() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config.coprocess.max_message_size, 100_000_000);
    }

    #[test]
    fn test_loader_presets() {
        let dev = ConfigLoader::new().with_development().load().unwrap();
        assert_eq!(dev.telemetry.logging.level, "debug");
        let prod = ConfigLoader::new().with_production().load().unwrap();
        assert_eq!(prod.telemetry.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"coprocess": {"http": {"endpoint": "http://127.0.0.1:5555/dispatch"}}}"#;
        let config = ConfigLoader::new()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(
            config.coprocess.http.endpoint.as_deref(),
            Some("http://127.0.0.1:5555/dispatch")
        );
    }

    #[test]
    fn test_loader_rejects_unknown_format() {
        assert!(ConfigLoader::new().with_string("", "yaml").is_err());
    }

    #[test]
    fn test_loader_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hermes.toml");
        fs::write(&path, "[coprocess]\nmax_message_size = 2048\n").unwrap();

        let config = ConfigLoader::new().with_file(&path).unwrap().load().unwrap();
        assert_eq!(config.coprocess.max_message_size, 2048);
    }

    #[test]
    fn test_loader_with_file_not_found() {
        let err = ConfigLoader::new()
            .with_file("/nonexistent/hermes.toml")
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_loader_with_optional_file_not_found() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/hermes.toml")
            .unwrap()
            .load_unvalidated();
        assert_eq!(config, GatewayConfig::default());
    }

    #[test]
    fn test_apply_env_var_coprocess() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__COPROCESS__HOOK_TIMEOUT_MS", "750", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__COPROCESS__HTTP__ENDPOINT", "http://hooks:80/", "TEST")
            .unwrap();
        assert_eq!(loader.config.coprocess.hook_timeout_ms, 750);
        assert_eq!(
            loader.config.coprocess.http.endpoint.as_deref(),
            Some("http://hooks:80/")
        );
    }

    #[test]
    fn test_apply_env_var_telemetry() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__TELEMETRY__LOGGING__FORMAT", "pretty", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__TELEMETRY__METRICS__ENABLED", "off", "TEST")
            .unwrap();
        assert_eq!(loader.config.telemetry.logging.format, LogFormat::Pretty);
        assert!(!loader.config.telemetry.metrics.enabled);
    }

    #[test]
    fn test_apply_env_var_invalid_integer() {
        let mut loader = ConfigLoader::new();
        let result =
            loader.apply_env_var("TEST__COPROCESS__MAX_MESSAGE_SIZE", "lots", "TEST");
        assert!(matches!(result, Err(ConfigError::EnvParseError { .. })));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    fn write_file(dir: &Path, name: &str, content: &str) {
        let mut file = fs::File::create(dir.join(name)).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_api_loader_reads_sorted_definitions() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "20-orders.json",
            r#"{"api_id": "orders", "org_id": "acme", "use_keyless": true}"#,
        );
        write_file(
            dir.path(),
            "10-users.toml",
            "api_id = \"users\"\norg_id = \"acme\"\nuse_keyless = true\n\n[[custom_middleware.pre]]\nname = \"first\"\n\n[[custom_middleware.pre]]\nname = \"second\"\n",
        );
        write_file(dir.path(), "README.md", "not a definition");

        let apis = ApiDefinitionLoader::new(dir.path()).load().unwrap();
        let ids: Vec<_> = apis.iter().map(|a| a.api_id.as_str()).collect();
        assert_eq!(ids, ["users", "orders"]);

        let pre: Vec<_> = apis[0]
            .custom_middleware
            .pre
            .iter()
            .map(|h| h.name.as_str())
            .collect();
        assert_eq!(pre, ["first", "second"]);
    }

    #[test]
    fn test_api_loader_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"api_id": "same", "org_id": "acme"}"#;
        write_file(dir.path(), "a.json", body);
        write_file(dir.path(), "b.json", body);

        let err = ApiDefinitionLoader::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateApi { ref api_id, .. } if api_id == "same"));
    }

    #[test]
    fn test_api_loader_validates() {
        let err = ApiDefinitionLoader::parse(
            r#"{"api_id": "x", "org_id": "o", "enable_coprocess_auth": true}"#,
            "json",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_api_loader_missing_dir() {
        let err = ApiDefinitionLoader::new("/nonexistent/apis").load().unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }
}
