#![cfg(test)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::fetch::{ApiError, FetchError, Fetcher, State};
use crate::identity::Identity;

const EPOCH: i64 = 1_700_000_000;

/// A fixed point in time, `secs` seconds after the test epoch.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(EPOCH + secs, 0).unwrap()
}

pub fn basic_state() -> State {
    serde_json::from_str(
        r#"{
            "flags": [
                {"id": "flag-new-feature", "key": "new_feature", "type": "boolean", "value": false},
                {"id": "flag-plan-limit", "key": "plan_limit", "type": "number", "value": 10},
                {"id": "flag-is-beta", "key": "is_beta", "type": "boolean", "value": false},
                {"id": "flag-region", "key": "region", "type": "string", "value": "us"},
                {"id": "flag-retries", "key": "retries", "type": "number", "value": 3, "dynamic_rules": []},
                {
                    "id": "flag-tier",
                    "key": "tier",
                    "type": "string",
                    "value": "free",
                    "dynamic_rules": [
                        {"expression": {"flag_id": "flag-is-beta", "op": "==", "value": true}, "value": "beta"},
                        {"expression": {"flag_id": "flag-is-beta", "op": "==", "value": true}, "value": "never"}
                    ]
                },
                {
                    "id": "flag-seats",
                    "key": "seats",
                    "type": "number",
                    "value": 5,
                    "dynamic_rules": [
                        {"expression": {"flag_id": "flag-plan-limit", "op": ">=", "value": 20}, "value": 100}
                    ]
                },
                {
                    "id": "flag-premium",
                    "key": "premium",
                    "type": "boolean",
                    "value": false,
                    "dynamic_rules": [
                        {"expression": {"flag_id": "flag-tier", "op": "==", "value": "beta"}, "value": true}
                    ]
                },
                {
                    "id": "flag-repeated",
                    "key": "repeated_reference",
                    "type": "boolean",
                    "value": false,
                    "dynamic_rules": [
                        {"expression": {"flag_id": "flag-is-beta", "op": "==", "value": true}, "value": false},
                        {"expression": {"flag_id": "flag-is-beta", "op": "==", "value": false}, "value": true}
                    ]
                },
                {
                    "id": "flag-cycle-a",
                    "key": "cycle_a",
                    "type": "boolean",
                    "value": false,
                    "dynamic_rules": [
                        {"expression": {"flag_id": "flag-cycle-b", "op": "==", "value": true}, "value": true}
                    ]
                },
                {
                    "id": "flag-cycle-b",
                    "key": "cycle_b",
                    "type": "boolean",
                    "value": false,
                    "dynamic_rules": [
                        {"expression": {"flag_id": "flag-cycle-a", "op": "==", "value": true}, "value": true}
                    ]
                },
                {
                    "id": "flag-self",
                    "key": "self_reference",
                    "type": "number",
                    "value": 0,
                    "dynamic_rules": [
                        {"expression": {"flag_id": "flag-self", "op": ">", "value": 1}, "value": 2}
                    ]
                },
                {
                    "id": "flag-dangling",
                    "key": "dangling",
                    "type": "string",
                    "value": "x",
                    "dynamic_rules": [
                        {"expression": {"flag_id": "flag-missing", "op": "==", "value": true}, "value": "y"}
                    ]
                },
                {"id": "flag-bad-default", "key": "bad_default", "type": "number", "value": "ten"},
                {
                    "id": "flag-bad-rule-value",
                    "key": "bad_rule_value",
                    "type": "string",
                    "value": "a",
                    "dynamic_rules": [
                        {"expression": {"flag_id": "flag-is-beta", "op": "==", "value": false}, "value": 42}
                    ]
                },
                {
                    "id": "flag-bad-rule-operator",
                    "key": "bad_rule_operator",
                    "type": "string",
                    "value": "a",
                    "dynamic_rules": [
                        {"expression": {"flag_id": "flag-is-beta", "op": "<", "value": true}, "value": "b"}
                    ]
                },
                {
                    "id": "flag-bad-comparison-value",
                    "key": "bad_comparison_value",
                    "type": "string",
                    "value": "a",
                    "dynamic_rules": [
                        {"expression": {"flag_id": "flag-plan-limit", "op": "==", "value": "25"}, "value": "b"}
                    ]
                },
                {
                    "id": "flag-stage",
                    "key": "stage",
                    "type": "string",
                    "value": "alpha",
                    "dynamic_rules": [
                        {"expression": {"flag_id": "flag-is-beta", "op": "==", "value": false}, "value": "beta"}
                    ]
                },
                {"id": "flag-bad-override", "key": "bad_override", "type": "number", "value": 1},
                {"id": "flag-layout", "key": "layout", "type": "json", "value": {"columns": 2}},
                {
                    "id": "flag-layout-dependent",
                    "key": "layout_dependent",
                    "type": "boolean",
                    "value": false,
                    "dynamic_rules": [
                        {"expression": {"flag_id": "flag-layout", "op": "==", "value": true}, "value": true}
                    ]
                }
            ],
            "overrides": [
                {"id": "override-new-feature", "key": "new_feature", "value": true},
                {"id": "override-plan-limit", "key": "plan_limit", "value": 25},
                {"id": "override-stage", "key": "stage", "value": "ga"},
                {"id": "override-bad-override", "key": "bad_override", "value": "one"}
            ]
        }"#,
    )
    .unwrap()
}

/// A [Clock] that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, secs: i64) {
        let mut now = self.now.lock();
        *now = *now + chrono::Duration::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// An in-memory [Fetcher] that counts its calls and can be told to fail.
pub struct TestFetcher {
    state: Mutex<State>,
    identities: Mutex<HashMap<String, Identity>>,
    fail_state: AtomicBool,
    fail_identity: AtomicBool,
    pub state_calls: AtomicUsize,
    pub identity_calls: AtomicUsize,
}

impl TestFetcher {
    pub fn new(state: State) -> Self {
        Self {
            state: Mutex::new(state),
            identities: Mutex::new(HashMap::new()),
            fail_state: AtomicBool::new(false),
            fail_identity: AtomicBool::new(false),
            state_calls: AtomicUsize::new(0),
            identity_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_state(&self, state: State) {
        *self.state.lock() = state;
    }

    pub fn add_identity(&self, identity: Identity) {
        self.identities
            .lock()
            .insert(identity.identifier.clone(), identity);
    }

    pub fn fail_state(&self, fail: bool) {
        self.fail_state.store(fail, Ordering::SeqCst);
    }

    pub fn fail_identity(&self, fail: bool) {
        self.fail_identity.store(fail, Ordering::SeqCst);
    }
}

impl Fetcher for TestFetcher {
    fn fetch_state(&self) -> Result<State, FetchError> {
        self.state_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_state.load(Ordering::SeqCst) {
            return Err(FetchError::transport("connection refused"));
        }
        Ok(self.state.lock().clone())
    }

    fn fetch_identity(&self, identifier: &str) -> Result<Identity, FetchError> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_identity.load(Ordering::SeqCst) {
            return Err(FetchError::transport("connection reset"));
        }
        self.identities
            .lock()
            .get(identifier)
            .cloned()
            .ok_or_else(|| {
                FetchError::Api(ApiError {
                    code: "not_found".to_string(),
                    message: format!("identity {} not found", identifier),
                    status_code: 404,
                })
            })
    }
}
