//! Aggregation of per-resource outcomes into one transaction result.
//!
//! Each participant outcome is classified into a [`Verdict`]. Verdicts form a
//! small join-semilattice:
//!
//! ```text
//!              Mixed
//!            /   |   \
//!  Indeterminate |  HeuristicRollback
//!        |       |        |
//!    Committed   |    RolledBack
//! ```
//!
//! Combining two verdicts takes their least upper bound, so the aggregate is
//! independent of the order in which participants answered. `Committed`
//! joined with anything on the rollback side is `Mixed`, and `Indeterminate`
//! joined with anything on the rollback side is `Mixed` too.

use crate::error::{CoordinatorError, CoordinatorResult, HeuristicOutcome};
use crate::types::Status;
use crate::xa::{XaError, XaErrorCode};

/// What one participant reported for the phase it was asked to complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The call succeeded.
    Completed,
    /// The participant voted read-only and left the protocol.
    ReadOnly,
    /// The call failed with a resource error.
    Failed(XaError),
}

impl Outcome {
    /// Returns the XA code of a failed outcome.
    #[must_use]
    pub fn code(&self) -> Option<XaErrorCode> {
        match self {
            Self::Failed(err) => Some(err.code),
            _ => None,
        }
    }

    /// Returns true if the participant reported a heuristic decision.
    #[must_use]
    pub fn is_heuristic(&self) -> bool {
        self.code().is_some_and(XaErrorCode::is_heuristic)
    }
}

impl From<Result<(), XaError>> for Outcome {
    fn from(result: Result<(), XaError>) -> Self {
        match result {
            Ok(()) => Self::Completed,
            Err(err) => Self::Failed(err),
        }
    }
}

/// Classification of an outcome, relative to a commit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Committed, read-only or heuristically committed.
    Committed,
    /// Rolled back without corrupting anything.
    RolledBack,
    /// Heuristically rolled back.
    HeuristicRollback,
    /// Partly committed and partly rolled back, or unknown damage.
    Mixed,
    /// Failed at the protocol level; the branch outcome is unknown.
    Indeterminate,
}

use Verdict::{
    Committed as C, HeuristicRollback as HR, Indeterminate as I, Mixed as M, RolledBack as RB,
};

/// Join table indexed by [`Verdict::index`].
const JOIN: [[Verdict; 5]; 5] = [
    //        C   RB  HR  M  I
    /* C  */ [C, M, M, M, I],
    /* RB */ [M, RB, HR, M, M],
    /* HR */ [M, HR, HR, M, M],
    /* M  */ [M, M, M, M, M],
    /* I  */ [I, M, M, M, I],
];

impl Verdict {
    /// Every verdict, in table order.
    pub const ALL: [Verdict; 5] = [C, RB, HR, M, I];

    const fn index(self) -> usize {
        match self {
            C => 0,
            RB => 1,
            HR => 2,
            M => 3,
            I => 4,
        }
    }

    /// Classifies a single participant outcome.
    #[must_use]
    pub fn of(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Completed | Outcome::ReadOnly => C,
            Outcome::Failed(err) => Self::of_code(err.code),
        }
    }

    /// Classifies an XA return code.
    #[must_use]
    pub const fn of_code(code: XaErrorCode) -> Self {
        match code {
            XaErrorCode::HeurCom | XaErrorCode::RdOnly => C,
            XaErrorCode::HeurRb => HR,
            XaErrorCode::HeurMix | XaErrorCode::HeurHaz => M,
            XaErrorCode::RmErr | XaErrorCode::NoTa => RB,
            code if code.is_rollback() => RB,
            _ => I,
        }
    }

    /// Least upper bound of two verdicts.
    #[must_use]
    pub const fn join(self, other: Self) -> Self {
        JOIN[self.index()][other.index()]
    }
}

/// How a transaction failed to commit cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Rolled back without heuristic damage.
    RolledBack,
    /// A heuristic outcome was reported.
    Heuristic(HeuristicOutcome),
    /// A protocol failure left the outcome undetermined.
    Internal(Option<XaError>),
}

/// Result of resolving a completion round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Status the transaction ends in.
    pub status: Status,
    /// The failure to report, if any.
    pub failure: Option<Failure>,
}

impl Resolution {
    /// A clean commit.
    #[must_use]
    pub const fn committed() -> Self {
        Self {
            status: Status::Committed,
            failure: None,
        }
    }

    /// Returns true if the transaction committed without failure.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Converts the resolution into the result reported to the caller.
    pub fn into_result(self) -> CoordinatorResult<()> {
        match self.failure {
            None => Ok(()),
            Some(Failure::RolledBack) => Err(CoordinatorError::rolled_back(
                "resources could not commit",
            )),
            Some(Failure::Heuristic(kind)) => Err(CoordinatorError::Heuristic(kind)),
            Some(Failure::Internal(Some(source))) => Err(CoordinatorError::internal_xa(
                "resource failed during completion",
                source,
            )),
            Some(Failure::Internal(None)) => Err(CoordinatorError::internal(
                "resource failed during completion",
            )),
        }
    }
}

/// Accumulates participant outcomes and maps them to a [`Resolution`].
#[derive(Debug, Clone, Default)]
pub struct OutcomeResolver {
    verdict: Option<Verdict>,
    first_protocol_error: Option<XaError>,
}

impl OutcomeResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one participant outcome into the aggregate.
    pub fn record(&mut self, outcome: &Outcome) {
        let verdict = Verdict::of(outcome);
        if verdict == I && self.first_protocol_error.is_none() {
            if let Outcome::Failed(err) = outcome {
                self.first_protocol_error = Some(err.clone());
            }
        }
        self.verdict = Some(match self.verdict {
            Some(current) => current.join(verdict),
            None => verdict,
        });
    }

    /// Returns the aggregate verdict so far, `None` if nothing was recorded.
    #[must_use]
    pub fn verdict(&self) -> Option<Verdict> {
        self.verdict
    }

    /// Resolves a round in which every participant was asked to commit.
    #[must_use]
    pub fn resolve_commit(self) -> Resolution {
        match self.verdict {
            None | Some(C) => Resolution::committed(),
            Some(RB) => Resolution {
                status: Status::RolledBack,
                failure: Some(Failure::RolledBack),
            },
            Some(HR) => Resolution {
                status: Status::RolledBack,
                failure: Some(Failure::Heuristic(HeuristicOutcome::Rollback)),
            },
            Some(M) => Resolution {
                status: Status::Unknown,
                failure: Some(Failure::Heuristic(HeuristicOutcome::Mixed)),
            },
            Some(I) => Resolution {
                status: Status::Unknown,
                failure: Some(Failure::Internal(self.first_protocol_error)),
            },
        }
    }

    /// Resolves a round that was rolled back because a prepare vote failed.
    ///
    /// Rollback-phase outcomes do not change the result; the transaction is
    /// rolled back either way. A protocol-level vote failure is reported as
    /// an internal error. A heuristic vote is joined with the rollback of
    /// the others: a heuristic rollback agrees with it, any other heuristic
    /// outcome leaves the transaction mixed.
    #[must_use]
    pub fn resolve_vote_failure(vote: &XaError) -> Resolution {
        let verdict = Verdict::of_code(vote.code);
        let verdict = if vote.code.is_heuristic() {
            verdict.join(RB)
        } else {
            verdict
        };
        match verdict {
            I => Resolution {
                status: Status::RolledBack,
                failure: Some(Failure::Internal(Some(vote.clone()))),
            },
            M => Resolution {
                status: Status::Unknown,
                failure: Some(Failure::Heuristic(HeuristicOutcome::Mixed)),
            },
            C | RB | HR => Resolution {
                status: Status::RolledBack,
                failure: Some(Failure::RolledBack),
            },
        }
    }
}

/// Resolves a commit round from a list of outcomes.
#[must_use]
pub fn resolve_commit<'a>(outcomes: impl IntoIterator<Item = &'a Outcome>) -> Resolution {
    let mut resolver = OutcomeResolver::new();
    for outcome in outcomes {
        resolver.record(outcome);
    }
    resolver.resolve_commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn failed(code: XaErrorCode) -> Outcome {
        Outcome::Failed(XaError::from(code))
    }

    fn resolve_codes(codes: &[Option<XaErrorCode>]) -> Resolution {
        let outcomes: Vec<Outcome> = codes
            .iter()
            .map(|c| c.map_or(Outcome::Completed, failed))
            .collect();
        resolve_commit(&outcomes)
    }

    #[test]
    fn join_table_is_commutative_and_idempotent() {
        for a in Verdict::ALL {
            assert_eq!(a.join(a), a);
            for b in Verdict::ALL {
                assert_eq!(a.join(b), b.join(a), "{a:?} v {b:?}");
            }
        }
    }

    #[test]
    fn join_table_is_associative() {
        for a in Verdict::ALL {
            for b in Verdict::ALL {
                for c in Verdict::ALL {
                    assert_eq!(a.join(b).join(c), a.join(b.join(c)));
                }
            }
        }
    }

    #[test]
    fn mixed_absorbs_everything() {
        for v in Verdict::ALL {
            assert_eq!(v.join(M), M);
        }
    }

    #[test]
    fn every_code_has_a_verdict() {
        use XaErrorCode::*;
        let expected = |code: XaErrorCode| match code {
            HeurCom | RdOnly => C,
            HeurRb => HR,
            HeurMix | HeurHaz => M,
            RmErr | NoTa | RbRollback | RbCommFail | RbDeadlock | RbIntegrity | RbOther
            | RbProto | RbTimeout | RbTransient => RB,
            Retry | Async | Inval | Proto | RmFail | DupId | Outside => I,
        };
        for code in XaErrorCode::ALL {
            assert_eq!(Verdict::of_code(code), expected(code), "{code}");
        }
    }

    #[test]
    fn empty_round_commits() {
        assert_eq!(resolve_codes(&[]), Resolution::committed());
    }

    #[test]
    fn one_phase_outcomes() {
        use XaErrorCode::*;
        assert!(resolve_codes(&[None]).is_success());
        assert!(resolve_codes(&[Some(HeurCom)]).is_success());
        assert_eq!(
            resolve_codes(&[Some(HeurRb)]).failure,
            Some(Failure::Heuristic(HeuristicOutcome::Rollback))
        );
        assert_eq!(
            resolve_codes(&[Some(HeurMix)]).failure,
            Some(Failure::Heuristic(HeuristicOutcome::Mixed))
        );
        assert_eq!(resolve_codes(&[Some(NoTa)]).failure, Some(Failure::RolledBack));
        assert_eq!(resolve_codes(&[Some(RmErr)]).failure, Some(Failure::RolledBack));
        assert!(matches!(
            resolve_codes(&[Some(RmFail)]).failure,
            Some(Failure::Internal(Some(ref e))) if e.code == RmFail
        ));
    }

    #[test]
    fn two_participant_commit_outcomes() {
        use XaErrorCode::*;
        let rollback = Some(Failure::Heuristic(HeuristicOutcome::Rollback));
        let mixed = Some(Failure::Heuristic(HeuristicOutcome::Mixed));

        assert!(matches!(
            resolve_codes(&[Some(RmFail), None]).failure,
            Some(Failure::Internal(_))
        ));
        assert_eq!(resolve_codes(&[Some(HeurRb), Some(HeurRb)]).failure, rollback);
        assert_eq!(resolve_codes(&[Some(HeurRb), Some(HeurMix)]).failure, mixed);
        assert_eq!(resolve_codes(&[Some(HeurRb), Some(HeurCom)]).failure, mixed);
        assert_eq!(resolve_codes(&[Some(HeurCom), Some(HeurRb)]).failure, mixed);
        assert_eq!(resolve_codes(&[Some(HeurRb), None]).failure, mixed);
        assert!(resolve_codes(&[Some(HeurCom), Some(HeurCom)]).is_success());
        assert!(resolve_codes(&[Some(HeurCom), None]).is_success());
    }

    #[test]
    fn final_statuses() {
        use XaErrorCode::*;
        assert_eq!(resolve_codes(&[None, None]).status, Status::Committed);
        assert_eq!(resolve_codes(&[Some(HeurRb)]).status, Status::RolledBack);
        assert_eq!(resolve_codes(&[Some(HeurHaz)]).status, Status::Unknown);
        assert_eq!(resolve_codes(&[Some(Proto)]).status, Status::Unknown);
    }

    #[test]
    fn vote_failures() {
        use XaErrorCode::*;
        for code in [RbRollback, RdOnly, RmErr, NoTa] {
            let resolution = OutcomeResolver::resolve_vote_failure(&XaError::from(code));
            assert_eq!(resolution.status, Status::RolledBack);
            assert_eq!(resolution.failure, Some(Failure::RolledBack), "{code}");
        }
        for code in [Proto, Inval, RmFail] {
            let resolution = OutcomeResolver::resolve_vote_failure(&XaError::from(code));
            assert_eq!(resolution.status, Status::RolledBack);
            assert!(matches!(resolution.failure, Some(Failure::Internal(_))), "{code}");
        }
    }

    #[test]
    fn heuristic_votes_join_the_rollback() {
        use XaErrorCode::*;
        let resolution = OutcomeResolver::resolve_vote_failure(&XaError::from(HeurRb));
        assert_eq!(resolution.status, Status::RolledBack);
        assert_eq!(resolution.failure, Some(Failure::RolledBack));
        for code in [HeurCom, HeurMix, HeurHaz] {
            let resolution = OutcomeResolver::resolve_vote_failure(&XaError::from(code));
            assert_eq!(resolution.status, Status::Unknown, "{code}");
            assert_eq!(
                resolution.failure,
                Some(Failure::Heuristic(HeuristicOutcome::Mixed)),
                "{code}"
            );
        }
    }

    #[test]
    fn into_result_maps_failures() {
        assert!(Resolution::committed().into_result().is_ok());
        let err = resolve_codes(&[Some(XaErrorCode::NoTa)])
            .into_result()
            .unwrap_err();
        assert!(err.is_rolled_back());
        assert!(err.rollback_cause().is_none());
    }

    fn verdict_strategy() -> impl Strategy<Value = Verdict> {
        prop::sample::select(Verdict::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn aggregate_ignores_order(verdicts in prop::collection::vec(verdict_strategy(), 1..8)) {
            let forward = verdicts.iter().copied().reduce(Verdict::join);
            let backward = verdicts.iter().rev().copied().reduce(Verdict::join);
            prop_assert_eq!(forward, backward);
        }

        #[test]
        fn clean_commits_never_fail(n in 0usize..6) {
            let outcomes = vec![Outcome::Completed; n];
            prop_assert!(resolve_commit(&outcomes).is_success());
        }
    }
}
