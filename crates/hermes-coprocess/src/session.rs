//! Sessions and the session store.
//!
//! A [`Session`] is what an authenticated caller maps to. The store is the
//! only shared mutable state in the dispatch path, so writes that read,
//! merge and save go through [`KeyLocks`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hermes_config::AuthType;
use hermes_core::Metadata;
use hermes_middleware::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Access granted to one API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AccessDefinition {
    /// API the grant is for.
    pub api_id: String,
    /// Versions allowed; empty means all.
    #[serde(default)]
    pub versions: Vec<String>,
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Session {
    /// Store key. Set by the gateway, hooks may leave it empty.
    #[serde(default)]
    pub key: String,
    /// Owning organisation.
    #[serde(default)]
    pub org_id: String,
    /// Requests allowed per `per` seconds.
    #[serde(default)]
    pub rate: f64,
    /// Rate window in seconds.
    #[serde(default)]
    pub per: f64,
    /// Arbitrary metadata, templated into response headers.
    #[serde(default)]
    pub metadata: Metadata,
    /// Per-API grants. Empty grants access to every API.
    #[serde(default)]
    pub access_rights: BTreeMap<String, AccessDefinition>,
    /// After this instant the session is treated as absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Mechanism that was authoritative when this session was last saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_identity: Option<AuthType>,
}

impl Session {
    /// Creates an empty session under `key`.
    pub fn new(org_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            org_id: org_id.into(),
            ..Self::default()
        }
    }

    /// Sets the rate limit.
    #[must_use]
    pub fn with_rate(mut self, rate: f64, per: f64) -> Self {
        self.rate = rate;
        self.per = per;
        self
    }

    /// Replaces the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Grants access to `api_id`.
    #[must_use]
    pub fn grant(mut self, api_id: impl Into<String>) -> Self {
        let api_id = api_id.into();
        self.access_rights.insert(
            api_id.clone(),
            AccessDefinition {
                api_id,
                versions: Vec::new(),
            },
        );
        self
    }

    /// Sets the expiry.
    #[must_use]
    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Returns `true` once `now` is past the expiry.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Returns `true` if the session may call `api_id`.
    #[must_use]
    pub fn allows(&self, api_id: &str) -> bool {
        self.access_rights.is_empty() || self.access_rights.contains_key(api_id)
    }

    /// Overlays a session returned by a hook onto this stored one.
    ///
    /// Fields the hook set win; fields it left at their defaults keep the
    /// stored value.
    pub fn overlay(&mut self, hook: Session) {
        if hook.rate != 0.0 || hook.per != 0.0 {
            self.rate = hook.rate;
            self.per = hook.per;
        }
        if !hook.metadata.is_empty() {
            self.metadata = hook.metadata;
        }
        if !hook.access_rights.is_empty() {
            self.access_rights = hook.access_rights;
        }
        if hook.expires_at.is_some() {
            self.expires_at = hook.expires_at;
        }
    }
}

/// Persistent session storage.
pub trait SessionStore: Send + Sync + 'static {
    /// Returns the live session stored under `(org_id, key)`.
    fn lookup<'a>(&'a self, org_id: &'a str, key: &'a str) -> BoxFuture<'a, Option<Session>>;

    /// Inserts or replaces a session.
    fn save(&self, session: Session) -> BoxFuture<'_, ()>;
}

/// In-memory store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<(String, String), Session>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a session synchronously.
    pub fn insert(&self, session: Session) {
        self.sessions
            .insert((session.org_id.clone(), session.key.clone()), session);
    }

    /// Number of stored sessions, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn lookup<'a>(&'a self, org_id: &'a str, key: &'a str) -> BoxFuture<'a, Option<Session>> {
        Box::pin(async move {
            let entry = self.sessions.get(&(org_id.to_string(), key.to_string()))?;
            if entry.is_expired_at(Utc::now()) {
                return None;
            }
            Some(entry.value().clone())
        })
    }

    fn save(&self, session: Session) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.insert(session) })
    }
}

/// Per-key async mutexes for read-merge-write sequences.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    /// Entries kept before idle locks are pruned.
    const PRUNE_THRESHOLD: usize = 4096;

    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        if self.locks.len() > Self::PRUNE_THRESHOLD {
            self.prune();
        }
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drops locks nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns `true` if no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
