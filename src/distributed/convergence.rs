//! Convergence controller.
//!
//! Decides after every round whether the distributed loop goes on. A round is
//! always merge, then halo exchange, then this check, so a "no change" verdict
//! is reached against halos that are already up to date.

use crate::core::error::{CommError, ConfigError};
use crate::distributed::comm::Communicator;
use serde::{Deserialize, Serialize};

/// Round budget of the default fixed-round policy.
pub const DEFAULT_ROUNDS: u32 = 5;

/// When the distributed loop stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConvergencePolicy {
    /// Run exactly `rounds` rounds.
    ///
    /// Regions spanning more band boundaries than the budget can cover stay
    /// split.
    Fixed {
        /// Round budget.
        rounds: u32,
    },
    /// Run until no worker changed anything in a round.
    ///
    /// Costs one OR-reduction per round. `max_rounds` optionally caps the
    /// loop.
    ChangeDriven {
        /// Round cap, unbounded when `None`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_rounds: Option<u32>,
    },
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        ConvergencePolicy::Fixed {
            rounds: DEFAULT_ROUNDS,
        }
    }
}

impl ConvergencePolicy {
    /// Fixed-round policy.
    pub fn fixed(rounds: u32) -> Self {
        ConvergencePolicy::Fixed { rounds }
    }

    /// Uncapped change-driven policy.
    pub fn change_driven() -> Self {
        ConvergencePolicy::ChangeDriven { max_rounds: None }
    }

    /// Change-driven policy that gives up after `max_rounds`.
    pub fn change_driven_capped(max_rounds: u32) -> Self {
        ConvergencePolicy::ChangeDriven {
            max_rounds: Some(max_rounds),
        }
    }

    /// Upper bound on the number of rounds, if there is one.
    pub fn round_limit(&self) -> Option<u32> {
        match *self {
            ConvergencePolicy::Fixed { rounds } => Some(rounds),
            ConvergencePolicy::ChangeDriven { max_rounds } => max_rounds,
        }
    }

    /// Reject budgets that would run no round at all.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.round_limit() == Some(0) {
            return Err(ConfigError::NoRounds);
        }
        Ok(())
    }
}

/// Verdict after a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundDecision {
    /// Run another round.
    Continue,
    /// Stop. `converged` is true when the last round changed nothing anywhere.
    Stop { converged: bool },
}

/// Per-worker convergence state.
///
/// Every worker holds its own controller. They stay in lock step because
/// they see the same round count and the same reduced flag.
#[derive(Debug, Clone)]
pub struct ConvergenceController {
    policy: ConvergencePolicy,
    rounds: u32,
}

impl ConvergenceController {
    /// Create a controller for `policy`.
    pub fn new(policy: ConvergencePolicy) -> Self {
        Self { policy, rounds: 0 }
    }

    /// Rounds completed so far.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Record the end of a round and decide whether to go on.
    ///
    /// Collective: every rank must call this once per round. The fixed-round
    /// policy only reduces the change flags after its last round, to report
    /// whether the budget was enough.
    pub fn end_round<C>(&mut self, comm: &C, local_changed: bool) -> Result<RoundDecision, CommError>
    where
        C: Communicator + ?Sized,
    {
        self.rounds += 1;
        let decision = match self.policy {
            ConvergencePolicy::Fixed { rounds } => {
                if self.rounds < rounds {
                    RoundDecision::Continue
                } else {
                    let any = comm.allreduce_or(local_changed)?;
                    RoundDecision::Stop { converged: !any }
                }
            }
            ConvergencePolicy::ChangeDriven { max_rounds } => {
                let any = comm.allreduce_or(local_changed)?;
                if !any {
                    RoundDecision::Stop { converged: true }
                } else if max_rounds.is_some_and(|max| self.rounds >= max) {
                    RoundDecision::Stop { converged: false }
                } else {
                    RoundDecision::Continue
                }
            }
        };
        log::debug!(
            "rank {} round {}: local change {}, {:?}",
            comm.rank(),
            self.rounds,
            local_changed,
            decision
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::comm::ChannelCommunicator;

    fn solo() -> ChannelCommunicator {
        ChannelCommunicator::world(1).remove(0)
    }

    #[test]
    fn test_fixed_runs_exact_budget() {
        let comm = solo();
        let mut controller = ConvergenceController::new(ConvergencePolicy::fixed(3));
        assert_eq!(controller.end_round(&comm, true).unwrap(), RoundDecision::Continue);
        assert_eq!(controller.end_round(&comm, false).unwrap(), RoundDecision::Continue);
        assert_eq!(
            controller.end_round(&comm, true).unwrap(),
            RoundDecision::Stop { converged: false }
        );
        assert_eq!(controller.rounds(), 3);
    }

    #[test]
    fn test_change_driven_stops_on_quiet_round() {
        let comm = solo();
        let mut controller = ConvergenceController::new(ConvergencePolicy::change_driven());
        for _ in 0..10 {
            assert_eq!(controller.end_round(&comm, true).unwrap(), RoundDecision::Continue);
        }
        assert_eq!(
            controller.end_round(&comm, false).unwrap(),
            RoundDecision::Stop { converged: true }
        );
        assert_eq!(controller.rounds(), 11);
    }

    #[test]
    fn test_change_driven_cap() {
        let comm = solo();
        let mut controller = ConvergenceController::new(ConvergencePolicy::change_driven_capped(2));
        assert_eq!(controller.end_round(&comm, true).unwrap(), RoundDecision::Continue);
        assert_eq!(
            controller.end_round(&comm, true).unwrap(),
            RoundDecision::Stop { converged: false }
        );
    }

    #[test]
    fn test_flags_are_reduced_across_workers() {
        let world = ChannelCommunicator::world(3);
        let decisions: Vec<RoundDecision> = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = world
                .into_iter()
                .map(|comm| {
                    s.spawn(move |_| {
                        let mut controller = ConvergenceController::new(ConvergencePolicy::change_driven());
                        // Only rank 1 still changes in round one.
                        let first = controller.end_round(&comm, comm.rank() == 1).unwrap();
                        assert_eq!(first, RoundDecision::Continue);
                        controller.end_round(&comm, false).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
        .unwrap();
        assert_eq!(decisions, vec![RoundDecision::Stop { converged: true }; 3]);
    }

    #[test]
    fn test_zero_budget_is_invalid() {
        assert_eq!(ConvergencePolicy::fixed(0).validate(), Err(ConfigError::NoRounds));
        assert!(ConvergencePolicy::change_driven().validate().is_ok());
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&ConvergencePolicy::fixed(7)).unwrap();
        assert_eq!(json, r#"{"mode":"fixed","rounds":7}"#);
        let policy: ConvergencePolicy = serde_json::from_str(r#"{"mode":"change_driven"}"#).unwrap();
        assert_eq!(policy, ConvergencePolicy::change_driven());
    }
}
