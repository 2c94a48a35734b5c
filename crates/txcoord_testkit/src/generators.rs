//! Property-based test generators using proptest.

use crate::resources::Script;
use proptest::prelude::*;
use txcoord_core::{Outcome, XaError, XaErrorCode};

/// Strategy over every XA code.
pub fn xa_error_code_strategy() -> impl Strategy<Value = XaErrorCode> {
    prop::sample::select(XaErrorCode::ALL.to_vec())
}

/// Strategy over the heuristic codes.
pub fn heuristic_code_strategy() -> impl Strategy<Value = XaErrorCode> {
    prop::sample::select(vec![
        XaErrorCode::HeurCom,
        XaErrorCode::HeurRb,
        XaErrorCode::HeurMix,
        XaErrorCode::HeurHaz,
    ])
}

/// Strategy for an optional failure, clean about half of the time.
pub fn maybe_failure_strategy() -> impl Strategy<Value = Option<XaErrorCode>> {
    prop_oneof![Just(None), xa_error_code_strategy().prop_map(Some)]
}

/// Strategy for a single participant outcome.
pub fn outcome_strategy() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        2 => Just(Outcome::Completed),
        1 => Just(Outcome::ReadOnly),
        3 => xa_error_code_strategy().prop_map(|code| Outcome::Failed(XaError::from(code))),
    ]
}

/// Strategy for the outcomes of one completion round.
pub fn outcomes_strategy(max: usize) -> impl Strategy<Value = Vec<Outcome>> {
    prop::collection::vec(outcome_strategy(), 0..=max)
}

/// Strategy for a resource script that may fail in `prepare`, `commit` or
/// `rollback`. `start` and `end` always succeed.
pub fn completion_script_strategy() -> impl Strategy<Value = Script> {
    (
        maybe_failure_strategy(),
        maybe_failure_strategy(),
        maybe_failure_strategy(),
        any::<bool>(),
    )
        .prop_map(|(prepare, commit, rollback, read_only)| Script {
            prepare,
            commit,
            rollback,
            read_only,
            ..Script::default()
        })
}

/// Strategy for the scripts of 1 to `max` distinct resources.
pub fn scripts_strategy(max: usize) -> impl Strategy<Value = Vec<Script>> {
    prop::collection::vec(completion_script_strategy(), 1..=max)
}
