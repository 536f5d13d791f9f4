use std::time::Duration;

use chrono::{DateTime, Utc};

/// Decides, on each evaluation, whether the flag state must be fetched again before it is
/// served.
pub trait RefreshPolicy: Send + Sync {
    /// `last_refresh` is None until the first successful refresh.
    fn should_refresh(&self, last_refresh: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool;
}

/// Refresh once the state is `interval` old.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntervalRefresh {
    interval: Duration,
}

impl IntervalRefresh {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl RefreshPolicy for IntervalRefresh {
    fn should_refresh(&self, last_refresh: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_refresh {
            // a negative age means the clock moved backwards; keep the current state
            Some(last_refresh) => match (now - last_refresh).to_std() {
                Ok(age) => age >= self.interval,
                Err(_) => false,
            },
            None => true,
        }
    }
}
