//! Loaded APIs and their pipelines.
//!
//! The registry swaps its whole API set atomically on [`ApiRegistry::reload`].
//! Requests resolve an [`ApiEntry`] once and keep the `Arc`, so a reload
//! never changes the hooks of a request already in flight.

use crate::auth::AuthReconciler;
use crate::dispatcher::ApiDispatcher;
use crate::driver::Drivers;
use crate::invoker::HookInvoker;
use crate::middleware::CoprocessMiddleware;
use crate::session::SessionStore;
use hermes_config::{ApiDefinition, ConfigError, CoprocessConfig};
use hermes_middleware::stages::{RequestIdMiddleware, ResponseHeadersMiddleware};
use hermes_middleware::Pipeline;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One loaded API.
#[derive(Debug)]
pub struct ApiEntry {
    /// The definition as loaded.
    pub definition: Arc<ApiDefinition>,
    /// The coprocess stage for this API.
    pub middleware: CoprocessMiddleware,
    /// Request id, response headers and coprocess stages, in that order.
    pub pipeline: Pipeline,
}

type ApiMap = HashMap<String, Arc<ApiEntry>>;

/// The set of APIs the gateway serves.
pub struct ApiRegistry {
    apis: RwLock<Arc<ApiMap>>,
    invoker: HookInvoker,
    reconciler: AuthReconciler,
    request_timeout: Duration,
}

impl ApiRegistry {
    /// Creates an empty registry.
    pub fn new(config: &CoprocessConfig, drivers: Drivers, store: Arc<dyn SessionStore>) -> Self {
        Self {
            apis: RwLock::new(Arc::new(HashMap::new())),
            invoker: HookInvoker::new(drivers, config),
            reconciler: AuthReconciler::new(store),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }

    /// Replaces every loaded API with `definitions`.
    ///
    /// Nothing changes unless all definitions are valid.
    pub fn reload(&self, definitions: Vec<ApiDefinition>) -> Result<(), ConfigError> {
        let mut apis = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            definition.validate()?;
            let api_id = definition.api_id.clone();
            let entry = self.build_entry(definition)?;
            if apis.insert(api_id.clone(), Arc::new(entry)).is_some() {
                return Err(ConfigError::validation_error(format!(
                    "API '{api_id}' defined twice"
                )));
            }
        }

        let count = apis.len();
        *self.apis.write() = Arc::new(apis);
        tracing::info!(apis = count, "API definitions loaded");
        Ok(())
    }

    /// Looks up an API.
    #[must_use]
    pub fn get(&self, api_id: &str) -> Option<Arc<ApiEntry>> {
        self.apis.read().get(api_id).cloned()
    }

    /// Ids of every loaded API, sorted.
    #[must_use]
    pub fn api_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.apis.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of loaded APIs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.apis.read().len()
    }

    /// Returns `true` if no API is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apis.read().is_empty()
    }

    fn build_entry(&self, definition: ApiDefinition) -> Result<ApiEntry, ConfigError> {
        let definition = Arc::new(definition);
        let dispatcher = ApiDispatcher::new(
            Arc::clone(&definition),
            self.invoker.clone(),
            self.reconciler.clone(),
        )?;
        let middleware = CoprocessMiddleware::new(Arc::new(dispatcher), self.request_timeout);
        let pipeline = Pipeline::builder()
            .stage(RequestIdMiddleware::trust_incoming())
            .stage(ResponseHeadersMiddleware::new(
                &definition.global_response_headers,
            ))
            .stage(middleware.clone())
            .build();

        Ok(ApiEntry {
            definition,
            middleware,
            pipeline,
        })
    }
}

impl std::fmt::Debug for ApiRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRegistry")
            .field("apis", &self.api_ids())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}
