//! Hook transports.
//!
//! A transport moves an encoded envelope to a hook and brings the reply back
//! as bytes. Size ceilings apply on both legs; decoding is the invoker's job.
//!
//! | Driver | Carries calls to |
//! |--------|------------------|
//! | [`HttpDriver`] | a single dispatch endpoint, one POST per call |
//! | [`InProcessDriver`] | [`HookHandler`]s registered in the gateway |

mod http;
mod in_process;

pub use self::http::{HttpDriver, HOOK_NAME_HEADER};
pub use self::in_process::{HookFn, HookHandler, InProcessDriver};

use crate::error::DispatchError;
use bytes::Bytes;
use hermes_config::DriverKind;
use hermes_middleware::BoxFuture;

/// Opaque bytes in, bytes out.
pub trait HookTransport: Send + Sync {
    /// Sends `payload` to `hook` and returns the raw reply.
    fn exchange<'a>(&'a self, hook: &'a str, payload: Bytes)
        -> BoxFuture<'a, Result<Bytes, DispatchError>>;
}

/// The implemented transports.
#[derive(Debug, Clone)]
pub enum Driver {
    /// JSON over HTTP.
    Http(HttpDriver),
    /// Handlers in this process.
    InProcess(InProcessDriver),
}

impl Driver {
    /// Which [`DriverKind`] this driver serves.
    #[must_use]
    pub const fn kind(&self) -> DriverKind {
        match self {
            Self::Http(_) => DriverKind::Http,
            Self::InProcess(_) => DriverKind::InProcess,
        }
    }
}

impl HookTransport for Driver {
    fn exchange<'a>(
        &'a self,
        hook: &'a str,
        payload: Bytes,
    ) -> BoxFuture<'a, Result<Bytes, DispatchError>> {
        match self {
            Self::Http(driver) => driver.exchange(hook, payload),
            Self::InProcess(driver) => driver.exchange(hook, payload),
        }
    }
}

impl From<HttpDriver> for Driver {
    fn from(driver: HttpDriver) -> Self {
        Self::Http(driver)
    }
}

impl From<InProcessDriver> for Driver {
    fn from(driver: InProcessDriver) -> Self {
        Self::InProcess(driver)
    }
}

/// The drivers available to a gateway, at most one per kind.
#[derive(Debug, Clone, Default)]
pub struct Drivers {
    drivers: Vec<Driver>,
}

impl Drivers {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a driver, replacing any of the same kind.
    #[must_use]
    pub fn with(mut self, driver: impl Into<Driver>) -> Self {
        let driver = driver.into();
        self.drivers.retain(|d| d.kind() != driver.kind());
        self.drivers.push(driver);
        self
    }

    /// Returns the driver for `kind`.
    #[must_use]
    pub fn get(&self, kind: DriverKind) -> Option<&Driver> {
        self.drivers.iter().find(|d| d.kind() == kind)
    }
}
