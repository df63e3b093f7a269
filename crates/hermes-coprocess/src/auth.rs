//! Authentication mechanisms and their reconciliation.
//!
//! An API may enable custom auth (the AuthCheck hook), standard token auth,
//! or both. Every enabled mechanism must accept the request. The mechanism
//! designated as base identity supplies the session of record; the others
//! only contribute metadata that is not already set.

use crate::envelope::Transaction;
use crate::error::DispatchError;
use crate::session::{KeyLocks, Session, SessionStore};
use hermes_config::{ApiDefinition, AuthType};
use hermes_core::{MetaValue, Metadata};
use hermes_telemetry::metrics as auth_metrics;
use std::sync::Arc;

/// Response metadata key carrying the session's rate limit, templated as
/// `$tyk_meta.rate`. A metadata entry of the same name takes precedence.
pub const RATE_METADATA_KEY: &str = "rate";

/// Standard token auth: the header value is a session key.
#[derive(Debug, Clone)]
pub struct TokenAuthenticator {
    header: String,
}

impl TokenAuthenticator {
    /// Reads the token from `header`.
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }

    /// Builds the authenticator for `api`.
    #[must_use]
    pub fn for_api(api: &ApiDefinition) -> Self {
        Self::new(api.auth_header(AuthType::AuthToken))
    }

    /// Looks the token up and checks it grants `api_id`.
    pub async fn authenticate(
        &self,
        store: &dyn SessionStore,
        tx: &Transaction,
        org_id: &str,
        api_id: &str,
    ) -> Result<Session, DispatchError> {
        let token = tx
            .header(&self.header)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DispatchError::missing(&self.header))?;

        let session = store
            .lookup(org_id, token)
            .await
            .ok_or_else(|| DispatchError::denied("unknown token"))?;

        if !session.allows(api_id) {
            return Err(DispatchError::denied("token has no access to this API"));
        }
        Ok(session)
    }
}

/// One mechanism's verdict.
#[derive(Debug)]
pub struct MechanismResult {
    /// Mechanism that ran.
    pub mechanism: AuthType,
    /// Its session, or why it refused.
    pub outcome: Result<Authenticated, DispatchError>,
}

/// A session a mechanism accepted.
#[derive(Debug, Clone)]
pub struct Authenticated {
    /// The session.
    pub session: Session,
    /// `true` when an AuthCheck hook returned it fresh and it must be written
    /// back over any stored record.
    pub from_hook: bool,
}

/// The reconciled identity for a request.
#[derive(Debug, Clone)]
pub struct Reconciled {
    /// Session of record.
    pub session: Session,
    /// Metadata visible to response-side stages: the canonical session's
    /// metadata and rate, plus keys only secondary sessions set.
    pub response_metadata: Metadata,
}

/// Combines mechanism results into the session of record.
#[derive(Clone)]
pub struct AuthReconciler {
    store: Arc<dyn SessionStore>,
    locks: Arc<KeyLocks>,
}

impl AuthReconciler {
    /// Creates a reconciler writing to `store`.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            locks: Arc::new(KeyLocks::new()),
        }
    }

    /// The session store.
    #[must_use]
    pub fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    /// Reconciles `results` with `base` as the authoritative mechanism.
    ///
    /// The base mechanism's failure is reported first; base identity is
    /// never a fallback, so any failure fails the request.
    pub async fn reconcile(
        &self,
        base: AuthType,
        results: Vec<MechanismResult>,
    ) -> Result<Reconciled, DispatchError> {
        for result in &results {
            auth_metrics::record_auth_decision(result.mechanism.name(), result.outcome.is_ok());
        }

        let (mut base_results, others): (Vec<_>, Vec<_>) =
            results.into_iter().partition(|r| r.mechanism == base);
        let base_result = base_results
            .pop()
            .ok_or_else(|| DispatchError::denied(format!("{} did not run", base.name())))?;
        let canonical = base_result.outcome?;

        let mut secondaries = Vec::with_capacity(others.len());
        for other in others {
            secondaries.push((other.mechanism, other.outcome?));
        }

        let session = self.persist(canonical, Some(base)).await;
        let mut response_metadata = session.metadata.clone();
        response_metadata
            .entry(RATE_METADATA_KEY.to_string())
            .or_insert(MetaValue::from(session.rate));
        for (mechanism, secondary) in secondaries {
            let secondary = if secondary.from_hook {
                self.persist(secondary, None).await
            } else {
                secondary.session
            };
            for (key, value) in secondary.metadata {
                response_metadata.entry(key).or_insert(value);
            }
            response_metadata
                .entry(RATE_METADATA_KEY.to_string())
                .or_insert(MetaValue::from(secondary.rate));
            tracing::debug!(mechanism = mechanism.name(), "merged secondary session metadata");
        }

        Ok(Reconciled {
            session,
            response_metadata,
        })
    }

    /// Writes a hook-returned session over its stored record, and tags the
    /// session of record with its mechanism.
    ///
    /// The stored record is re-read under the key lock, so a copy read before
    /// reconciliation never replaces a newer write.
    async fn persist(&self, auth: Authenticated, base: Option<AuthType>) -> Session {
        if !auth.from_hook && base.is_none() {
            return auth.session;
        }

        let _guard = self.locks.lock(&auth.session.key).await;
        let stored = self
            .store
            .lookup(&auth.session.org_id, &auth.session.key)
            .await;
        let mut session = match (auth.from_hook, stored) {
            (true, Some(mut stored)) => {
                stored.overlay(auth.session);
                stored
            }
            (true, None) => auth.session,
            (false, Some(stored)) => stored,
            // Removed or expired since it was read: nothing to tag.
            (false, None) => return auth.session,
        };

        let retag = base.is_some() && session.base_identity != base;
        if retag {
            session.base_identity = base;
        }
        if auth.from_hook || retag {
            self.store.save(session.clone()).await;
        }
        session
    }
}

impl std::fmt::Debug for AuthReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthReconciler")
            .field("locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}
