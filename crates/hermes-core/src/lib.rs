//! # Hermes Core
//!
//! Core types shared by the Hermes gateway crates.
//!
//! - [`RequestId`] - UUID v7 request identifier
//! - [`HookStage`] - The four points in the request pipeline where hooks run
//! - [`MetaValue`] / [`Metadata`] - Typed metadata carried between hooks and sessions
//! - [`ErrorCategory`] / [`ErrorEnvelope`] - Error classification and the JSON error body

#![doc(html_root_url = "https://docs.rs/hermes-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod metadata;
mod request_id;
mod stage;

pub use error::{ErrorCategory, ErrorDetail, ErrorEnvelope};
pub use metadata::{MetaValue, Metadata};
pub use request_id::RequestId;
pub use stage::{HookStage, ParseStageError};
