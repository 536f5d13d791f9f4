use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

/// How long a fetched flag state is served before the next evaluation refreshes it.
pub const DEFAULT_STATE_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// How long a fetched identity is served before it must be fetched again.
pub const DEFAULT_IDENTITY_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for a [crate::Client].
///
/// Intervals are expressed in whole seconds when (de)serialized; missing fields take their
/// defaults.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    pub state_refresh_interval: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub identity_refresh_interval: Duration,
    /// When set, an identity fetch failure during a boolean evaluation yields `false` instead of
    /// an error. Number and string evaluations always report the failure.
    pub legacy_bool_identity_fallback: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            state_refresh_interval: DEFAULT_STATE_REFRESH_INTERVAL,
            identity_refresh_interval: DEFAULT_IDENTITY_REFRESH_INTERVAL,
            legacy_bool_identity_fallback: false,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_refresh_interval(mut self, interval: Duration) -> Self {
        self.state_refresh_interval = interval;
        self
    }

    pub fn identity_refresh_interval(mut self, interval: Duration) -> Self {
        self.identity_refresh_interval = interval;
        self
    }

    pub fn legacy_bool_identity_fallback(mut self, enabled: bool) -> Self {
        self.legacy_bool_identity_fallback = enabled;
        self
    }
}
