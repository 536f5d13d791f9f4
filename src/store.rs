use std::collections::HashMap;

use chrono::{DateTime, Utc};
use itertools::Itertools;

use crate::fetch::State;
use crate::flag::{Flag, Override};

/// Store is an interface for the flag data the evaluation engine reads.
///
/// Ordinarily the only implementation is [Snapshot], the immutable state held by
/// [crate::Client] between refreshes.
pub trait Store {
    /// Retrieve the flag with key `flag_key`.
    fn flag(&self, flag_key: &str) -> Option<&Flag>;

    /// Retrieve the flag whose internal id is `flag_id`. Dynamic rules reference flags this way.
    fn flag_by_id(&self, flag_id: &str) -> Option<&Flag>;

    /// Retrieve the global override for `flag_key`.
    fn global_override(&self, flag_key: &str) -> Option<&Override>;
}

/// A complete, immutable set of flags and global overrides as of one refresh.
///
/// Snapshots are never modified once built; a refresh builds a new one and swaps it in whole.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    flags: HashMap<String, Flag>,
    flag_keys_by_id: HashMap<String, String>,
    overrides: HashMap<String, Override>,
    last_refresh: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Index the payload of a state fetch. When keys or ids repeat, the last occurrence wins.
    pub fn new(state: State, refreshed_at: DateTime<Utc>) -> Self {
        let mut flags = HashMap::with_capacity(state.flags.len());
        let mut flag_keys_by_id = HashMap::with_capacity(state.flags.len());
        for flag in state.flags {
            flag_keys_by_id.insert(flag.id.clone(), flag.key.clone());
            flags.insert(flag.key.clone(), flag);
        }

        let overrides = state
            .overrides
            .into_iter()
            .map(|o| (o.key.clone(), o))
            .collect();

        Self {
            flags,
            flag_keys_by_id,
            overrides,
            last_refresh: Some(refreshed_at),
        }
    }

    /// When this snapshot was fetched, or None for the empty snapshot a client starts with.
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_refresh
    }

    /// All flag keys, sorted.
    pub fn flag_keys(&self) -> Vec<&str> {
        self.flags.keys().map(String::as_str).sorted().collect()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

impl Store for Snapshot {
    fn flag(&self, flag_key: &str) -> Option<&Flag> {
        self.flags.get(flag_key)
    }

    fn flag_by_id(&self, flag_id: &str) -> Option<&Flag> {
        let key = self.flag_keys_by_id.get(flag_id)?;
        self.flags.get(key).filter(|flag| flag.id == flag_id)
    }

    fn global_override(&self, flag_key: &str) -> Option<&Override> {
        self.overrides.get(flag_key)
    }
}
