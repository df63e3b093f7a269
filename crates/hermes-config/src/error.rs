//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading gateway configuration or API definitions.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The named gateway or API file does not exist.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// Where it was looked for.
        path: PathBuf,
    },

    /// The file exists but could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// The unreadable file.
        path: PathBuf,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// A `.toml` file did not parse.
    #[error("failed to parse TOML configuration: {0}")]
    TomlError(#[from] toml::de::Error),

    /// A `.json` file did not parse.
    #[error("failed to parse JSON configuration: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A value parsed but is out of range or inconsistent.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// Dotted path of the field.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A field the definition cannot do without.
    #[error("missing required configuration field: {field}")]
    MissingField {
        /// Dotted path of the field.
        field: String,
    },

    /// A `PREFIX__SECTION__KEY` override has the wrong type.
    #[error("failed to parse environment variable {var}: {reason}")]
    EnvParseError {
        /// Variable name.
        var: String,
        /// Expected type.
        reason: String,
    },

    /// Cross-field checks failed after loading.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),

    /// Two API definitions share an id.
    #[error("duplicate API definition '{api_id}' in {path}")]
    DuplicateApi {
        /// The repeated id.
        api_id: String,
        /// File holding the second occurrence.
        path: PathBuf,
    },

    /// Directory listing failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// File not found at `path`.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Read failure for `path`.
    pub fn read_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadError {
            path: path.into(),
            source,
        }
    }

    /// Bad value for `field`.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// `field` is required.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Bad override in `var`.
    pub fn env_parse_error(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvParseError {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// Cross-field failure.
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }
}
