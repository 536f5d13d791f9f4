use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::eval::{evaluate, Detail, Error, Reason};
use crate::fetch::{FetchError, Fetcher};
use crate::flag_value::{FlagType, FlagValueType};
use crate::identity::{Identity, IdentityCache};
use crate::refresh::{IntervalRefresh, RefreshPolicy};
use crate::store::{Snapshot, Store};

/// Errors returned by the evaluation entry points of [Client].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Evaluation(#[from] Error),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Client evaluates flags for subjects, keeping the flag state and identity overrides it needs
/// cached in memory.
///
/// Flag state is refreshed inline by whichever evaluation finds it due according to the client's
/// [RefreshPolicy]; identities are fetched on demand and cached for
/// [ClientConfig::identity_refresh_interval]. A client is safe to share between threads.
pub struct Client {
    fetcher: Box<dyn Fetcher>,
    clock: Box<dyn Clock>,
    refresh_policy: Box<dyn RefreshPolicy>,
    config: ClientConfig,
    state: RwLock<Arc<Snapshot>>,
    identities: IdentityCache,
}

impl Client {
    /// Creates a client that has not fetched anything yet; the first evaluation fetches the
    /// flag state.
    pub fn new<F: Fetcher + 'static>(fetcher: F, config: ClientConfig) -> Self {
        Self {
            fetcher: Box::new(fetcher),
            clock: Box::new(SystemClock),
            refresh_policy: Box::new(IntervalRefresh::new(config.state_refresh_interval)),
            identities: IdentityCache::new(config.identity_refresh_interval),
            state: RwLock::new(Arc::new(Snapshot::default())),
            config,
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Replaces the interval-based refresh decision, e.g. with one driven by a background poller
    /// or by push invalidation.
    pub fn with_refresh_policy<P: RefreshPolicy + 'static>(mut self, policy: P) -> Self {
        self.refresh_policy = Box::new(policy);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Evaluates the boolean flag `key` for `identifier` (empty for no subject).
    pub fn evaluate_bool(&self, key: &str, identifier: &str) -> Result<bool, ClientError> {
        self.evaluate_detail(key, identifier).map(|detail| detail.value)
    }

    /// Evaluates the number flag `key` for `identifier` (empty for no subject).
    pub fn evaluate_number(&self, key: &str, identifier: &str) -> Result<f64, ClientError> {
        self.evaluate_detail(key, identifier).map(|detail| detail.value)
    }

    /// Evaluates the string flag `key` for `identifier` (empty for no subject).
    pub fn evaluate_string(&self, key: &str, identifier: &str) -> Result<String, ClientError> {
        self.evaluate_detail(key, identifier).map(|detail| detail.value)
    }

    /// Evaluates the flag `key` as `T` for `identifier`, returning the value along with the
    /// [Reason] it was chosen.
    ///
    /// The flag state is refreshed first if it is due. An empty `identifier` skips the identity
    /// lookup entirely.
    pub fn evaluate_detail<T: FlagValueType>(
        &self,
        key: &str,
        identifier: &str,
    ) -> Result<Detail<T>, ClientError> {
        self.ensure_fresh()?;
        let snapshot = self.snapshot();

        let flag = snapshot.flag(key).ok_or(Error::FlagNotFound)?;
        if flag.flag_type != T::FLAG_TYPE {
            return Err(Error::InvalidFlagType.into());
        }

        let identity = if identifier.is_empty() {
            None
        } else {
            match self.identity(identifier) {
                Ok(identity) => Some(identity),
                Err(e)
                    if T::FLAG_TYPE == FlagType::Boolean
                        && self.config.legacy_bool_identity_fallback =>
                {
                    warn!(
                        "serving false for {}: identity {} unavailable: {}",
                        key, identifier, e
                    );
                    return Ok(Detail::new(T::default(), Reason::IdentityUnavailable));
                }
                Err(e) => return Err(e.into()),
            }
        };

        let detail = evaluate(&*snapshot, flag, identity.as_deref())?;
        Ok(detail.try_map(T::from_flag_value, Error::MalformedFlag)?)
    }

    /// Refreshes the flag state if the refresh policy says it is due.
    ///
    /// On failure the previous state stays in place and the error is returned.
    pub fn ensure_fresh(&self) -> Result<(), FetchError> {
        let now = self.clock.now();
        let last_refresh = self.state.read().last_refresh();
        if !self.refresh_policy.should_refresh(last_refresh, now) {
            return Ok(());
        }
        self.refresh_at(now)
    }

    /// Fetches the flag state unconditionally.
    pub fn refresh(&self) -> Result<(), FetchError> {
        self.refresh_at(self.clock.now())
    }

    fn refresh_at(&self, now: DateTime<Utc>) -> Result<(), FetchError> {
        debug!("refreshing flag state");
        let state = self.fetcher.fetch_state().map_err(|e| {
            warn!("failed to refresh flag state, keeping previous state: {}", e);
            e
        })?;

        let snapshot = Arc::new(Snapshot::new(state, now));
        let flag_count = snapshot.len();

        let mut current = self.state.write();
        *current = snapshot;
        let evicted = self.identities.evict_stale(now);
        drop(current);

        debug!(
            "flag state refreshed: {} flags, {} stale identities evicted",
            flag_count, evicted
        );
        Ok(())
    }

    /// Returns the identity for `identifier`, from the cache if a fresh entry exists and from the
    /// fetcher otherwise.
    pub fn identity(&self, identifier: &str) -> Result<Arc<Identity>, FetchError> {
        if let Some(identity) = self.identities.get(identifier, self.clock.now()) {
            debug!("identity {} served from cache", identifier);
            return Ok(identity);
        }

        debug!("fetching identity {}", identifier);
        let identity = self.fetcher.fetch_identity(identifier).map_err(|e| {
            warn!("failed to fetch identity {}: {}", identifier, e);
            e
        })?;
        Ok(self.identities.insert(identifier, identity, self.clock.now()))
    }

    /// The flag state currently being served.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.state.read().clone()
    }

    /// Number of identities currently cached, including ones that are stale but not yet evicted.
    pub fn cached_identities(&self) -> usize {
        self.identities.len()
    }
}
