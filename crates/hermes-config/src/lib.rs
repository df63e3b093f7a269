//! Typed configuration for the Hermes gateway.
//!
//! Two kinds of configuration live here:
//!
//! - [`GatewayConfig`]: process-wide settings ([`CoprocessConfig`] limits and
//!   driver endpoints, [`TelemetryConfigSection`]). Loaded with
//!   [`ConfigLoader`] from defaults, a TOML/JSON file and `PREFIX__SECTION__KEY`
//!   environment variables.
//! - [`ApiDefinition`]: one per proxied API. Declares authentication, the hooks
//!   for each stage, config data and ignored paths. Loaded with
//!   [`ApiDefinitionLoader`] from a directory.
//!
//! All schema types reject unknown fields.
//!
//! # Configuration File Format
//!
//! ```toml
//! [coprocess]
//! max_message_size = 100000000
//! hook_timeout_ms = 10000
//! request_timeout_ms = 30000
//!
//! [coprocess.http]
//! endpoint = "http://127.0.0.1:5555/dispatch"
//!
//! [telemetry]
//! service_name = "hermes-gateway"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod api;
mod config;
mod error;
mod loader;
mod schema;

pub use api::{
    ApiDefinition, AuthConfig, AuthConfigs, AuthType, DriverKind, ExtractFrom, ExtractWith,
    HookDescriptor, IdExtractorConfig, IgnoredPath, MiddlewareSection,
};
pub use config::{GatewayConfig, GatewayConfigBuilder};
pub use error::ConfigError;
pub use loader::{ApiDefinitionLoader, ConfigLoader};
pub use schema::*;
