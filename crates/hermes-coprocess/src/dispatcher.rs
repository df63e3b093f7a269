//! The per-API stage machine.
//!
//! ```text
//! Pre ──▶ AuthCheck ──▶ Post ──▶ (upstream) ──▶ Response
//! ```
//!
//! Hooks within a stage run in declared order, each seeing the transaction
//! as the previous hook left it. Any failure aborts the request with a
//! [`StageError`] for the stage it happened in.

use crate::auth::{AuthReconciler, Authenticated, MechanismResult, Reconciled, TokenAuthenticator};
use crate::config_data;
use crate::envelope::{self, EncodeSeed, ResponseState, SpecSection, Transaction};
use crate::error::{DispatchError, StageError};
use crate::extractor::CredentialExtractor;
use crate::invoker::HookInvoker;
use crate::session::Session;
use hermes_config::{ApiDefinition, AuthType, ConfigError, HookDescriptor};
use hermes_core::{HookStage, MetaValue, Metadata};
use hermes_middleware::Response;
use hermes_telemetry::logging::redact_key;
use std::sync::Arc;
use std::time::Instant;

/// Metadata key carrying the extracted session key into the AuthCheck hook.
pub const SESSION_ID_METADATA_KEY: &str = "session_id";

/// How a stage ended.
#[derive(Debug)]
pub enum StageOutcome {
    /// Carry on with the next stage.
    Continue,
    /// A hook short-circuited with this response.
    Respond(Response),
}

/// Result of the request-side stages.
#[derive(Debug)]
pub enum RequestFlow {
    /// Forward upstream, with the reconciled identity if the API authenticates.
    Forward(Option<Reconciled>),
    /// Respond without contacting the upstream.
    Respond(Response),
}

/// Runs the hook stages for one API.
#[derive(Debug)]
pub struct ApiDispatcher {
    api: Arc<ApiDefinition>,
    invoker: HookInvoker,
    reconciler: AuthReconciler,
    extractor: Option<CredentialExtractor>,
    token: Option<TokenAuthenticator>,
}

impl ApiDispatcher {
    /// Creates the dispatcher, compiling the API's identity extractor.
    pub fn new(
        api: Arc<ApiDefinition>,
        invoker: HookInvoker,
        reconciler: AuthReconciler,
    ) -> Result<Self, ConfigError> {
        let mechanisms = api.auth_mechanisms();
        let extractor = if mechanisms.contains(&AuthType::CustomAuth) {
            Some(CredentialExtractor::from_config(
                &api.custom_middleware.id_extractor,
                api.auth_header(AuthType::CustomAuth),
            )?)
        } else {
            None
        };
        let token = mechanisms
            .contains(&AuthType::AuthToken)
            .then(|| TokenAuthenticator::for_api(&api));

        Ok(Self {
            api,
            invoker,
            reconciler,
            extractor,
            token,
        })
    }

    /// The API this dispatcher serves.
    #[must_use]
    pub fn api(&self) -> &ApiDefinition {
        &self.api
    }

    /// Returns `true` if the API declares Response hooks.
    #[must_use]
    pub fn has_response_hooks(&self) -> bool {
        !self.api.custom_middleware.response.is_empty()
    }

    /// Runs Pre, AuthCheck and Post.
    pub async fn before_upstream(
        &self,
        tx: &mut Transaction,
        deadline: Option<Instant>,
    ) -> Result<RequestFlow, StageError> {
        if let StageOutcome::Respond(response) =
            self.run_stage(HookStage::Pre, tx, None, deadline).await?
        {
            return Ok(RequestFlow::Respond(response));
        }

        let identity = self.authenticate(tx, deadline).await?;

        let session = identity.as_ref().map(|r| &r.session);
        if let StageOutcome::Respond(response) =
            self.run_stage(HookStage::Post, tx, session, deadline).await?
        {
            return Ok(RequestFlow::Respond(response));
        }

        Ok(RequestFlow::Forward(identity))
    }

    /// Runs the hooks of a mutating stage (Pre, Post or Response).
    pub async fn run_stage(
        &self,
        stage: HookStage,
        tx: &mut Transaction,
        session: Option<&Session>,
        deadline: Option<Instant>,
    ) -> Result<StageOutcome, StageError> {
        for hook in self.api.custom_middleware.hooks(stage) {
            if hook.require_session && session.is_none() {
                tracing::debug!(api_id = %self.api.api_id, stage = %stage, hook = %hook.name, "skipping hook without session");
                continue;
            }

            let seed = EncodeSeed {
                spec: self.spec_section(),
                session: session.cloned(),
                metadata: Metadata::new(),
            };
            let decoded = self
                .call(stage, hook, tx, seed, deadline)
                .await
                .map_err(|e| StageError::in_hook(stage, &hook.name, e))?;

            if let Some(overrides) = decoded.overrides {
                if stage == HookStage::Response {
                    tx.response = Some(ResponseState {
                        status: overrides.status,
                        headers: overrides.headers,
                        body: overrides.body,
                    });
                    continue;
                }
                tracing::debug!(api_id = %self.api.api_id, stage = %stage, hook = %hook.name, status = overrides.status.as_u16(), "hook short-circuited request");
                return Ok(StageOutcome::Respond(overrides.into_response()));
            }
        }
        Ok(StageOutcome::Continue)
    }

    /// Runs every enabled auth mechanism and reconciles the result.
    ///
    /// Returns `None` for keyless APIs and ignored paths.
    pub async fn authenticate(
        &self,
        tx: &mut Transaction,
        deadline: Option<Instant>,
    ) -> Result<Option<Reconciled>, StageError> {
        if !self.api.requires_auth() || self.api.is_ignored_path(tx.path()) {
            return Ok(None);
        }
        let Some(base) = self.api.base_identity() else {
            return Ok(None);
        };

        let mut results = Vec::with_capacity(2);
        for mechanism in self.api.auth_mechanisms() {
            let outcome = match mechanism {
                AuthType::CustomAuth => self.custom_auth(tx, deadline).await?,
                AuthType::AuthToken => self.token_auth(tx).await,
            };
            results.push(MechanismResult { mechanism, outcome });
        }

        let reconciled = self
            .reconciler
            .reconcile(base, results)
            .await
            .map_err(|e| StageError::new(HookStage::AuthCheck, e))?;

        tracing::debug!(
            api_id = %self.api.api_id,
            session = %redact_key(&reconciled.session.key),
            base = base.name(),
            "request authenticated"
        );
        Ok(Some(reconciled))
    }

    async fn token_auth(&self, tx: &Transaction) -> Result<Authenticated, DispatchError> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| DispatchError::denied("token auth not configured"))?;
        let session = token
            .authenticate(
                self.reconciler.store(),
                tx,
                &self.api.org_id,
                &self.api.api_id,
            )
            .await?;
        Ok(Authenticated {
            session,
            from_hook: false,
        })
    }

    /// Custom auth through the AuthCheck hook.
    ///
    /// The outer error aborts the request outright (transport and decode
    /// failures); the inner result is the mechanism's verdict.
    async fn custom_auth(
        &self,
        tx: &mut Transaction,
        deadline: Option<Instant>,
    ) -> Result<Result<Authenticated, DispatchError>, StageError> {
        let (Some(extractor), Some(hook)) =
            (&self.extractor, &self.api.custom_middleware.auth_check)
        else {
            return Ok(Err(DispatchError::denied("custom auth has no auth_check hook")));
        };

        let extracted = match extractor.extract(tx, &self.api.org_id) {
            Ok(extracted) => extracted,
            Err(e) => return Ok(Err(e)),
        };

        if extracted.derived {
            if let Some(session) = self
                .reconciler
                .store()
                .lookup(&self.api.org_id, &extracted.session_key)
                .await
                .filter(|s| s.allows(&self.api.api_id))
            {
                tracing::debug!(
                    api_id = %self.api.api_id,
                    session = %redact_key(&extracted.session_key),
                    "using cached session for extracted id"
                );
                return Ok(Ok(Authenticated {
                    session,
                    from_hook: false,
                }));
            }
        }

        let seed = EncodeSeed {
            spec: self.spec_section(),
            session: None,
            metadata: Metadata::from([(
                SESSION_ID_METADATA_KEY.to_string(),
                MetaValue::from(extracted.session_key.as_str()),
            )]),
        };
        let decoded = self
            .call(HookStage::AuthCheck, hook, tx, seed, deadline)
            .await
            .map_err(|e| StageError::in_hook(HookStage::AuthCheck, &hook.name, e))?;

        if let Some(overrides) = decoded.overrides.filter(|o| o.status.as_u16() >= 400) {
            return Ok(Err(DispatchError::denied(format!(
                "auth hook denied with {}",
                overrides.status
            ))));
        }

        Ok(match decoded.session {
            Some(mut session) => {
                session.key = extracted.session_key;
                session.org_id.clone_from(&self.api.org_id);
                Ok(Authenticated {
                    session,
                    from_hook: true,
                })
            }
            None => Err(DispatchError::denied("auth hook returned no session")),
        })
    }

    async fn call(
        &self,
        stage: HookStage,
        hook: &HookDescriptor,
        tx: &mut Transaction,
        seed: EncodeSeed,
        deadline: Option<Instant>,
    ) -> Result<envelope::Decoded, DispatchError> {
        let request = envelope::encode(tx, stage, &hook.name, seed);
        let request = config_data::inject(
            request,
            &self.api.config_data,
            self.api.config_data_disabled,
        );
        let driver = self.api.custom_middleware.driver_for(hook);
        let reply = self
            .invoker
            .invoke(&self.api.api_id, driver, request, deadline)
            .await?;
        envelope::decode(reply, tx, stage)
    }

    fn spec_section(&self) -> SpecSection {
        SpecSection {
            api_id: self.api.api_id.clone(),
            org_id: self.api.org_id.clone(),
            config_data: Metadata::new(),
        }
    }
}
