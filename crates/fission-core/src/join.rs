//! # Fusion (Fan-in Join)
//!
//! Stages attached to a join target notify it once per successful
//! iteration. [`JoinBarrier`] is the whole contract a stage relies on;
//! [`Fusion`] is the barrier shipped with the crate, whose satisfaction rule
//! is chosen with [`FusionRule`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Notification side of a fan-in join.
pub trait JoinBarrier: Send + Sync {
    /// Record one completed iteration of a contributing stage.
    fn fuse(&self);
}

// =============================================================================
// FUSION RULE
// =============================================================================

/// When a round of a [`Fusion`] counts as complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionRule {
    /// Every contributor has fused.
    #[default]
    All,
    /// At least one contributor has fused.
    Any,
    /// At least `n` contributors have fused (capped at the contributor count).
    Quorum(usize),
}

impl FusionRule {
    /// Number of arrivals that complete a round with `contributors` stages.
    #[must_use]
    pub fn required(&self, contributors: usize) -> usize {
        match self {
            FusionRule::All => contributors,
            FusionRule::Any => contributors.min(1),
            FusionRule::Quorum(n) => contributors.min(*n),
        }
    }
}

// =============================================================================
// FUSION
// =============================================================================

#[derive(Debug, Default)]
struct FusionState {
    contributors: usize,
    arrived: usize,
    rounds: u64,
}

/// Counting fan-in barrier.
///
/// Arrivals beyond what a round needs are carried into the next round, so a
/// straggler under [`FusionRule::Any`] pre-fills the following round.
#[derive(Debug, Default)]
pub struct Fusion {
    rule: FusionRule,
    state: Mutex<FusionState>,
    fused: Condvar,
    total: AtomicU64,
}

impl Fusion {
    /// Create a fusion with no contributors.
    #[must_use]
    pub fn new(rule: FusionRule) -> Self {
        Self {
            rule,
            ..Self::default()
        }
    }

    /// Create a fusion expecting `contributors` stages.
    #[must_use]
    pub fn with_contributors(rule: FusionRule, contributors: usize) -> Self {
        let fusion = Self::new(rule);
        fusion.set_contributors(contributors);
        fusion
    }

    fn lock(&self) -> MutexGuard<'_, FusionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The satisfaction rule.
    #[must_use]
    pub fn rule(&self) -> FusionRule {
        self.rule
    }

    /// Set how many stages contribute to each round.
    pub fn set_contributors(&self, contributors: usize) {
        self.lock().contributors = contributors;
        self.fused.notify_all();
    }

    /// Number of contributing stages.
    #[must_use]
    pub fn contributors(&self) -> usize {
        self.lock().contributors
    }

    /// Add one contributor and return the new count.
    pub fn add_contributor(&self) -> usize {
        let mut state = self.lock();
        state.contributors = state.contributors.saturating_add(1);
        state.contributors
    }

    /// Block until the current round is satisfied, then start the next one.
    ///
    /// Returns immediately when the rule requires no arrivals.
    pub fn wait_fused(&self) {
        let rule = self.rule;
        let state = self.lock();
        let mut state = self
            .fused
            .wait_while(state, |s| s.arrived < rule.required(s.contributors))
            .unwrap_or_else(PoisonError::into_inner);
        Self::complete_round(&mut state, rule);
    }

    /// Like [`Fusion::wait_fused`], giving up after `timeout`.
    ///
    /// Returns `false` if the round was not satisfied in time; the arrivals
    /// collected so far stay in the round.
    pub fn wait_fused_timeout(&self, timeout: Duration) -> bool {
        let rule = self.rule;
        let state = self.lock();
        let (mut state, result) = self
            .fused
            .wait_timeout_while(state, timeout, |s| {
                s.arrived < rule.required(s.contributors)
            })
            .unwrap_or_else(PoisonError::into_inner);

        if result.timed_out() && state.arrived < rule.required(state.contributors) {
            return false;
        }
        Self::complete_round(&mut state, rule);
        true
    }

    fn complete_round(state: &mut FusionState, rule: FusionRule) {
        let required = rule.required(state.contributors);
        state.arrived = state.arrived.saturating_sub(required);
        state.rounds = state.rounds.saturating_add(1);
    }

    /// Arrivals collected for the current round.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().arrived
    }

    /// Rounds completed through `wait_fused*`.
    #[must_use]
    pub fn rounds(&self) -> u64 {
        self.lock().rounds
    }

    /// Lifetime number of `fuse()` notifications.
    #[must_use]
    pub fn fuse_count(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }
}

impl JoinBarrier for Fusion {
    fn fuse(&self) {
        let mut state = self.lock();
        state.arrived = state.arrived.saturating_add(1);
        self.total.fetch_add(1, Ordering::AcqRel);
        drop(state);
        self.fused.notify_all();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rule_requirements() {
        assert_eq!(FusionRule::All.required(4), 4);
        assert_eq!(FusionRule::Any.required(4), 1);
        assert_eq!(FusionRule::Any.required(0), 0);
        assert_eq!(FusionRule::Quorum(3).required(4), 3);
        assert_eq!(FusionRule::Quorum(9).required(4), 4);
    }

    #[test]
    fn all_rule_waits_for_every_contributor() {
        let fusion = Fusion::with_contributors(FusionRule::All, 3);
        fusion.fuse();
        fusion.fuse();
        assert!(!fusion.wait_fused_timeout(Duration::from_millis(20)));

        fusion.fuse();
        assert!(fusion.wait_fused_timeout(Duration::from_millis(20)));
        assert_eq!(fusion.pending(), 0);
        assert_eq!(fusion.rounds(), 1);
        assert_eq!(fusion.fuse_count(), 3);
    }

    #[test]
    fn any_rule_carries_stragglers_into_next_round() {
        let fusion = Fusion::with_contributors(FusionRule::Any, 2);
        fusion.fuse();
        fusion.fuse();

        fusion.wait_fused();
        assert_eq!(fusion.pending(), 1);
        assert!(fusion.wait_fused_timeout(Duration::from_millis(5)));
        assert_eq!(fusion.rounds(), 2);
    }

    #[test]
    fn wait_fused_wakes_on_concurrent_fuse() {
        let fusion = Arc::new(Fusion::with_contributors(FusionRule::All, 2));
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let fusion = Arc::clone(&fusion);
                thread::spawn(move || fusion.fuse())
            })
            .collect();

        fusion.wait_fused();
        for worker in workers {
            worker.join().expect("join");
        }
        assert_eq!(fusion.fuse_count(), 2);
    }

    #[test]
    fn rule_deserializes_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            rule: FusionRule,
        }
        let parsed: Wrapper = serde_json::from_str(r#"{"rule":{"quorum":2}}"#).expect("parse");
        assert_eq!(parsed.rule, FusionRule::Quorum(2));
    }
}
