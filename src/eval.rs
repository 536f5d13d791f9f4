use std::collections::HashSet;

use log::warn;
use serde::Serialize;

use crate::flag::Flag;
use crate::flag_value::FlagValue;
use crate::identity::Identity;
use crate::store::Store;

const PREALLOCATED_RULE_CHAIN_SIZE: usize = 20;

/// Keys of the flags whose dynamic rules are currently being evaluated, outermost first.
pub(crate) struct EvaluationStack {
    pub(crate) rule_chain: HashSet<String>,
}

impl EvaluationStack {
    fn new() -> Self {
        Self {
            rule_chain: HashSet::with_capacity(PREALLOCATED_RULE_CHAIN_SIZE),
        }
    }
}

impl Default for EvaluationStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the value of `flag` for the subject described by `identity` (None if there is no
/// subject).
///
/// Sources are consulted in precedence order and the first one that applies wins:
///
/// 1. the identity's override for the flag key;
/// 2. the global override for the flag key;
/// 3. the flag's dynamic rules, in order, each comparing the resolved value of another flag
///    (evaluated recursively with the same identity) against the rule's comparison value;
/// 4. the flag's static default.
///
/// Every value served is checked against the flag's declared type. A rule that references a
/// missing flag fails with [Error::FlagNotFound]; a rule chain that refers back to a flag already
/// being evaluated fails with [Error::MalformedFlag].
pub fn evaluate<'a>(
    store: &'a dyn Store,
    flag: &'a Flag,
    identity: Option<&'a Identity>,
) -> Result<Detail<&'a FlagValue>, Error> {
    let mut evaluation_stack = EvaluationStack::default();
    evaluate_internal(store, flag, identity, &mut evaluation_stack)
}

fn evaluate_internal<'a>(
    store: &'a dyn Store,
    flag: &'a Flag,
    identity: Option<&'a Identity>,
    evaluation_stack: &mut EvaluationStack,
) -> Result<Detail<&'a FlagValue>, Error> {
    if let Some(value) = identity.and_then(|identity| identity.override_for(&flag.key)) {
        return Ok(Detail::new(flag.check_value(value)?, Reason::IdentityOverride));
    }

    if let Some(global) = store.global_override(&flag.key) {
        return Ok(Detail::new(
            flag.check_value(&global.value)?,
            Reason::GlobalOverride,
        ));
    }

    if !flag.dynamic_rules.is_empty() {
        if evaluation_stack.rule_chain.contains(&flag.key) {
            warn!(
                "dynamic rules of {} refer back to itself; this is probably a temporary condition due to an incomplete update",
                flag.key
            );
            return Err(Error::MalformedFlag);
        }

        evaluation_stack.rule_chain.insert(flag.key.clone());
        let result = match_rules(store, flag, identity, evaluation_stack);
        evaluation_stack.rule_chain.remove(&flag.key);

        if let Some(detail) = result? {
            return Ok(detail);
        }
    }

    Ok(Detail::new(flag.check_value(&flag.value)?, Reason::Default))
}

fn match_rules<'a>(
    store: &'a dyn Store,
    flag: &'a Flag,
    identity: Option<&'a Identity>,
    evaluation_stack: &mut EvaluationStack,
) -> Result<Option<Detail<&'a FlagValue>>, Error> {
    for (rule_index, rule) in flag.dynamic_rules.iter().enumerate() {
        let expression = &rule.expression;
        let referenced = match store.flag_by_id(&expression.flag_id) {
            Some(referenced) => referenced,
            None => {
                warn!(
                    "rule {} of {} references unknown flag id {}",
                    rule_index, flag.key, expression.flag_id
                );
                return Err(Error::FlagNotFound);
            }
        };

        let resolved = evaluate_internal(store, referenced, identity, evaluation_stack)?;
        if expression.op.matches(resolved.value, &expression.value)? {
            let value = flag.check_value(&rule.value)?;
            return Ok(Some(Detail::new(value, Reason::RuleMatch { rule_index })));
        }
    }

    Ok(None)
}

/// A Detail instance is returned from [evaluate], combining the resolved value with an
/// explanation of where it came from.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detail<T> {
    pub value: T,
    pub reason: Reason,
}

impl<T> Detail<T> {
    pub fn new(value: T, reason: Reason) -> Detail<T> {
        Detail { value, reason }
    }

    /// Returns a new instance of this detail with the provided function `f` applied to
    /// [Detail::value].
    pub fn map<U, F>(self, f: F) -> Detail<U>
    where
        F: FnOnce(T) -> U,
    {
        Detail {
            value: f(self.value),
            reason: self.reason,
        }
    }

    /// Like [Detail::map], but `f` may reject the value, in which case `e` is returned.
    pub fn try_map<U, F>(self, f: F, e: Error) -> Result<Detail<U>, Error>
    where
        F: FnOnce(T) -> Option<U>,
    {
        match f(self.value) {
            Some(value) => Ok(Detail {
                value,
                reason: self.reason,
            }),
            None => Err(e),
        }
    }
}

/// Reason describes which source produced an evaluation result.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind")]
pub enum Reason {
    /// The subject's identity carries an override for the flag.
    IdentityOverride,
    /// A global override exists for the flag.
    GlobalOverride,
    /// One of the flag's dynamic rules matched.
    #[serde(rename_all = "camelCase")]
    RuleMatch {
        /// Zero-based index of the matching rule.
        rule_index: usize,
    },
    /// Nothing overrode the flag, so its static default was served.
    Default,
    /// The subject's identity could not be fetched and the boolean fallback value was served.
    /// Only produced when [crate::ClientConfig::legacy_bool_identity_fallback] is enabled.
    IdentityUnavailable,
}

/// Error is returned when a flag could not be evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Error {
    /// FlagNotFound indicates that the caller provided a flag key that did not match any known
    /// flag, or that a dynamic rule referenced a flag id that does not exist.
    #[error("flag requested does not exist")]
    FlagNotFound,
    /// InvalidFlagType indicates that the flag was requested as a type other than its declared
    /// type, e.g. a number flag read through the boolean entry point.
    #[error("flag requested is of invalid type")]
    InvalidFlagType,
    /// MalformedFlag indicates an internal inconsistency in the flag data, e.g. a value that does
    /// not match the flag's declared type, an operator that is not defined for the compared
    /// type, or dynamic rules that refer back to themselves.
    #[error("flag data is malformed")]
    MalformedFlag,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::State;
    use crate::flag_value::FlagValue::*;
    use crate::store::Snapshot;
    use crate::test_common::{at, basic_state};
    use assert_json_diff::assert_json_eq;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    fn snapshot() -> Snapshot {
        Snapshot::new(basic_state(), at(0))
    }

    fn eval_key(
        store: &Snapshot,
        key: &str,
        identity: Option<&Identity>,
    ) -> Result<Detail<FlagValue>, Error> {
        let flag = store.flag(key).unwrap();
        evaluate(store, flag, identity).map(|detail| detail.map(|v| v.clone()))
    }

    #[test_case("is_beta", Bool(false))]
    #[test_case("region", Str("us".into()))]
    #[test_case("retries", Number(3.0))]
    fn serves_default_without_overrides_or_rules(key: &str, expected: FlagValue) {
        let store = snapshot();
        let detail = eval_key(&store, key, None).unwrap();
        assert_that!(detail.value).is_equal_to(expected);
        assert_that!(detail.reason).is_equal_to(Reason::Default);
    }

    #[test]
    fn default_is_stable_across_evaluations() {
        let store = snapshot();
        let first = eval_key(&store, "region", None).unwrap();
        let second = eval_key(&store, "region", None).unwrap();
        assert_that!(first).is_equal_to(second);
    }

    #[test]
    fn identity_override_beats_global_override() {
        let store = snapshot();
        let identity = Identity::new("user_123").with_override("new_feature", false);

        let detail = eval_key(&store, "new_feature", Some(&identity)).unwrap();
        assert_that!(detail.value).is_equal_to(Bool(false));
        assert_that!(detail.reason).is_equal_to(Reason::IdentityOverride);

        let detail = eval_key(&store, "new_feature", None).unwrap();
        assert_that!(detail.value).is_equal_to(Bool(true));
        assert_that!(detail.reason).is_equal_to(Reason::GlobalOverride);
    }

    #[test]
    fn identity_override_beats_dynamic_rules() {
        let store = snapshot();
        let identity = Identity::new("user_123")
            .with_override("is_beta", true)
            .with_override("tier", "enterprise");

        let detail = eval_key(&store, "tier", Some(&identity)).unwrap();
        assert_that!(detail.value).is_equal_to(Str("enterprise".into()));
        assert_that!(detail.reason).is_equal_to(Reason::IdentityOverride);
    }

    #[test]
    fn identity_without_matching_override_falls_through() {
        let store = snapshot();
        let identity = Identity::new("user_123").with_override("unrelated", true);

        let detail = eval_key(&store, "plan_limit", Some(&identity)).unwrap();
        assert_that!(detail.value).is_equal_to(Number(25.0));
        assert_that!(detail.reason).is_equal_to(Reason::GlobalOverride);
    }

    #[test]
    fn global_override_beats_default() {
        let store = snapshot();
        let detail = eval_key(&store, "plan_limit", None).unwrap();
        assert_that!(detail.value).is_equal_to(Number(25.0));
        assert_that!(detail.reason).is_equal_to(Reason::GlobalOverride);
    }

    #[test]
    fn global_override_beats_matching_rule() {
        let store = snapshot();
        let detail = eval_key(&store, "stage", None).unwrap();
        assert_that!(detail.value).is_equal_to(Str("ga".into()));
        assert_that!(detail.reason).is_equal_to(Reason::GlobalOverride);

        let identity = Identity::new("user_123").with_override("stage", "canary");
        let detail = eval_key(&store, "stage", Some(&identity)).unwrap();
        assert_that!(detail.value).is_equal_to(Str("canary".into()));
        assert_that!(detail.reason).is_equal_to(Reason::IdentityOverride);
    }

    #[test]
    fn first_matching_rule_wins() {
        let store = snapshot();
        let identity = Identity::new("user_123").with_override("is_beta", true);

        let detail = eval_key(&store, "tier", Some(&identity)).unwrap();
        assert_that!(detail.value).is_equal_to(Str("beta".into()));
        assert_that!(detail.reason).is_equal_to(Reason::RuleMatch { rule_index: 0 });
    }

    #[test]
    fn no_matching_rule_serves_default() {
        let store = snapshot();
        let detail = eval_key(&store, "tier", None).unwrap();
        assert_that!(detail.value).is_equal_to(Str("free".into()));
        assert_that!(detail.reason).is_equal_to(Reason::Default);
    }

    #[test]
    fn rule_compares_against_referenced_flags_resolved_value() {
        let store = snapshot();
        // plan_limit defaults to 10 but is globally overridden to 25, which satisfies >= 20
        let detail = eval_key(&store, "seats", None).unwrap();
        assert_that!(detail.value).is_equal_to(Number(100.0));
        assert_that!(detail.reason).is_equal_to(Reason::RuleMatch { rule_index: 0 });

        let identity = Identity::new("user_123").with_override("plan_limit", 5.0);
        let detail = eval_key(&store, "seats", Some(&identity)).unwrap();
        assert_that!(detail.value).is_equal_to(Number(5.0));
        assert_that!(detail.reason).is_equal_to(Reason::Default);
    }

    #[test]
    fn rules_recurse_through_rule_driven_flags() {
        let store = snapshot();
        let beta = Identity::new("user_123").with_override("is_beta", true);

        let detail = eval_key(&store, "premium", Some(&beta)).unwrap();
        assert_that!(detail.value).is_equal_to(Bool(true));

        let detail = eval_key(&store, "premium", None).unwrap();
        assert_that!(detail.value).is_equal_to(Bool(false));
    }

    #[test]
    fn repeated_reference_is_not_a_cycle() {
        let store = snapshot();
        let detail = eval_key(&store, "repeated_reference", None).unwrap();
        assert_that!(detail.value).is_equal_to(Bool(true));
        assert_that!(detail.reason).is_equal_to(Reason::RuleMatch { rule_index: 1 });
    }

    #[test_case("cycle_a")]
    #[test_case("cycle_b")]
    #[test_case("self_reference")]
    fn rule_cycles_are_malformed(key: &str) {
        let store = snapshot();
        assert_that!(eval_key(&store, key, None)).is_err_containing(Error::MalformedFlag);
    }

    #[test]
    fn rule_cycle_broken_by_override_evaluates() {
        let store = snapshot();
        let identity = Identity::new("user_123").with_override("cycle_b", true);
        let detail = eval_key(&store, "cycle_a", Some(&identity)).unwrap();
        assert_that!(detail.value).is_equal_to(Bool(true));
        assert_that!(detail.reason).is_equal_to(Reason::RuleMatch { rule_index: 0 });
    }

    #[test_case("premium"; "after a match")]
    #[test_case("cycle_a"; "after a cycle")]
    #[test_case("dangling"; "after a missing reference")]
    fn evaluation_stack_is_unwound(key: &str) {
        let store = snapshot();
        let flag = store.flag(key).unwrap();
        let mut evaluation_stack = EvaluationStack::default();

        let _ = evaluate_internal(&store, flag, None, &mut evaluation_stack);
        assert!(evaluation_stack.rule_chain.is_empty());
    }

    #[test]
    fn dangling_rule_reference_is_not_found() {
        let store = snapshot();
        assert_that!(eval_key(&store, "dangling", None)).is_err_containing(Error::FlagNotFound);
    }

    #[test_case("bad_default")]
    #[test_case("bad_rule_value")]
    #[test_case("bad_rule_operator")]
    #[test_case("bad_comparison_value")]
    #[test_case("bad_override")]
    #[test_case("layout")]
    #[test_case("layout_dependent")]
    fn data_integrity_problems_are_malformed(key: &str) {
        let store = snapshot();
        assert_that!(eval_key(&store, key, None)).is_err_containing(Error::MalformedFlag);
    }

    #[test]
    fn mistyped_identity_override_is_malformed() {
        let store = snapshot();
        let identity = Identity::new("user_123").with_override("new_feature", "yes");
        assert_that!(eval_key(&store, "new_feature", Some(&identity)))
            .is_err_containing(Error::MalformedFlag);

        let identity = Identity::new("user_123").with_override("new_feature", json!({"on": true}));
        assert_that!(eval_key(&store, "new_feature", Some(&identity)))
            .is_err_containing(Error::MalformedFlag);
    }

    #[test]
    fn mistyped_override_on_referenced_flag_aborts_evaluation() {
        let store = snapshot();
        let identity = Identity::new("user_123").with_override("is_beta", 1.0);
        assert_that!(eval_key(&store, "tier", Some(&identity))).is_err_containing(Error::MalformedFlag);
    }

    #[test]
    fn evaluates_against_an_empty_store() {
        let store = Snapshot::new(State::default(), at(0));
        let flag = crate::Flag::new("f-1", "lonely", "value");
        let detail = evaluate(&store, &flag, None).unwrap();
        assert_that!(detail.value).is_equal_to(&Str("value".into()));
    }

    #[test]
    fn detail_try_map() {
        let value = Bool(true);
        let detail = Detail::new(&value, Reason::Default);
        assert_that!(detail.clone().try_map(FlagValue::as_bool, Error::MalformedFlag))
            .is_ok_containing(Detail::new(true, Reason::Default));
        assert_that!(detail.try_map(FlagValue::as_number, Error::MalformedFlag))
            .is_err_containing(Error::MalformedFlag);
    }

    #[test]
    fn reason_serialization() {
        assert_json_eq!(
            serde_json::to_value(Reason::RuleMatch { rule_index: 2 }).unwrap(),
            json!({"kind": "RULE_MATCH", "ruleIndex": 2})
        );
        assert_json_eq!(
            serde_json::to_value(Detail::new(25.0, Reason::GlobalOverride)).unwrap(),
            json!({"value": 25.0, "reason": {"kind": "GLOBAL_OVERRIDE"}})
        );
        assert_json_eq!(
            serde_json::to_value(Error::InvalidFlagType).unwrap(),
            json!("INVALID_FLAG_TYPE")
        );
    }

    #[test]
    fn error_messages() {
        assert_that!(Error::FlagNotFound.to_string())
            .is_equal_to("flag requested does not exist".to_string());
        assert_that!(Error::InvalidFlagType.to_string())
            .is_equal_to("flag requested is of invalid type".to_string());
    }
}
