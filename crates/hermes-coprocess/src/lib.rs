//! # Hermes Coprocess
//!
//! Out-of-process middleware dispatch: the gateway hands each proxied
//! request to external hooks at four fixed stages and applies what they
//! return.
//!
//! ```text
//!            ┌────────── ApiDispatcher ──────────┐
//! request ─▶ Pre ─▶ AuthCheck ─▶ Post ─▶ upstream ─▶ Response ─▶ client
//!             │        │          │                    │
//!             └────────┴── HookInvoker ────────────────┘
//!                           │
//!                  Driver::{Http, InProcess}
//! ```
//!
//! - [`envelope`]: encodes the live [`Transaction`] into the JSON
//!   [`Envelope`] hooks see, and validates replies before applying them.
//! - [`invoker`]: size ceilings, deadlines, metrics; no retries.
//! - [`extractor`]: derives session keys from credentials.
//! - [`auth`]: runs every enabled auth mechanism and picks the session of
//!   record.
//! - [`config_data`]: hands per-API static data to hooks.
//! - [`dispatcher`] and [`middleware`]: the stage machine and its pipeline
//!   stage.
//! - [`registry`]: the loaded API set, reloadable at runtime.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use hermes_config::{ApiDefinition, CoprocessConfig, DriverKind, HookDescriptor};
//! use hermes_coprocess::driver::{Drivers, HookFn, InProcessDriver};
//! use hermes_coprocess::{ApiRegistry, MemorySessionStore};
//!
//! let config = CoprocessConfig::default();
//! let hooks = InProcessDriver::new(config.max_message_size).register(
//!     "tag",
//!     HookFn::new(|mut envelope| async move {
//!         envelope.request.set_headers.insert("x-tagged".into(), "1".into());
//!         Ok(envelope)
//!     }),
//! );
//!
//! let mut api = ApiDefinition::new("orders", "acme");
//! api.custom_middleware.driver = DriverKind::InProcess;
//! api.custom_middleware.pre.push(HookDescriptor::named("tag"));
//!
//! let registry = ApiRegistry::new(
//!     &config,
//!     Drivers::new().with(hooks),
//!     Arc::new(MemorySessionStore::new()),
//! );
//! registry.reload(vec![api]).unwrap();
//! assert!(registry.get("orders").is_some());
//! ```

#![doc(html_root_url = "https://docs.rs/hermes-coprocess/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod config_data;
pub mod dispatcher;
pub mod driver;
pub mod envelope;
pub mod error;
pub mod extractor;
pub mod invoker;
pub mod middleware;
pub mod registry;
pub mod session;

pub use auth::{AuthReconciler, Reconciled, TokenAuthenticator};
pub use dispatcher::{ApiDispatcher, RequestFlow, StageOutcome};
pub use driver::{Driver, Drivers, HookTransport};
pub use envelope::{Envelope, Transaction};
pub use error::{DispatchError, StageError};
pub use extractor::{generate_session_id, CredentialExtractor, IdExtractor};
pub use invoker::HookInvoker;
pub use middleware::CoprocessMiddleware;
pub use registry::{ApiEntry, ApiRegistry};
pub use session::{KeyLocks, MemorySessionStore, Session, SessionStore};
