use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::RwLock;
use serde::Deserialize;

use crate::flag::null_as_default;
use crate::flag_value::FlagValue;

/// The override profile of one subject, as returned by the identity fetch.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Identity {
    #[serde(default)]
    pub id: String,
    pub identifier: String,
    /// Per-flag override values keyed by flag key. Values are checked against the flag's declared
    /// type when read.
    #[serde(default, deserialize_with = "null_as_default")]
    pub overrides: HashMap<String, FlagValue>,

    #[serde(skip)]
    pub(crate) fetched_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn new(identifier: &str) -> Self {
        Self {
            id: String::new(),
            identifier: identifier.to_string(),
            overrides: HashMap::new(),
            fetched_at: None,
        }
    }

    pub fn with_override(mut self, flag_key: &str, value: impl Into<FlagValue>) -> Self {
        self.overrides.insert(flag_key.to_string(), value.into());
        self
    }

    pub fn override_for(&self, flag_key: &str) -> Option<&FlagValue> {
        self.overrides.get(flag_key)
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    /// An identity fetched at `t0` is fresh until `t0 + ttl`. Identities that were never stamped
    /// are always stale. A clock that moved backwards leaves the entry fresh.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match self.fetched_at {
            Some(fetched_at) => match (now - fetched_at).to_std() {
                Ok(elapsed) => elapsed >= ttl,
                Err(_) => false,
            },
            None => true,
        }
    }
}

/// Per-subject cache of [Identity] records with a fixed time to live.
///
/// Lookups only ever return fresh entries. Concurrent misses for the same identifier are not
/// coalesced; each caller fetches and the last insert wins.
pub struct IdentityCache {
    entries: RwLock<HashMap<String, Arc<Identity>>>,
    ttl: Duration,
}

impl IdentityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the cached identity for `identifier` if present and not stale at `now`.
    pub fn get(&self, identifier: &str, now: DateTime<Utc>) -> Option<Arc<Identity>> {
        let entries = self.entries.read();
        entries
            .get(identifier)
            .filter(|identity| !identity.is_stale(now, self.ttl))
            .cloned()
    }

    /// Stamps `identity` with `fetched_at` and stores it under `identifier`, replacing any
    /// previous entry.
    pub fn insert(
        &self,
        identifier: &str,
        mut identity: Identity,
        fetched_at: DateTime<Utc>,
    ) -> Arc<Identity> {
        identity.fetched_at = Some(fetched_at);
        let identity = Arc::new(identity);
        self.entries
            .write()
            .insert(identifier.to_string(), identity.clone());
        identity
    }

    /// Drops every entry that is stale at `now` and returns how many were dropped.
    pub fn evict_stale(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, identity| !identity.is_stale(now, self.ttl));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!("evicted {} stale identities", evicted);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
