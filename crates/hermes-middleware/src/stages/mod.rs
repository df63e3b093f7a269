//! Built-in pipeline stages.

pub mod request_id;
pub mod response_headers;

pub use request_id::{RequestIdMiddleware, REQUEST_ID_HEADER};
pub use response_headers::{ResponseHeadersMiddleware, META_TEMPLATE_PREFIX};
