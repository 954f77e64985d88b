//! # Stage Metrics
//!
//! | Counter | Incremented when |
//! |---------|------------------|
//! | `process_calls` | `process()` is about to run |
//! | `completions` | `process()` returned success, before the broadcast |
//! | `broadcasts` | the stage's own signal was woken |
//! | `join_notifications` | the join target was fused |
//!
//! `completions` is bumped before the broadcast so that a successor's
//! completions can never be observed ahead of its predecessor's.

use crate::{StageExit, StageState};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

// =============================================================================
// STAGE COUNTERS
// =============================================================================

/// Live counters shared between a stage and its thread.
#[derive(Debug, Default)]
pub struct StageCounters {
    process_calls: AtomicU64,
    completions: AtomicU64,
    broadcasts: AtomicU64,
    join_notifications: AtomicU64,
    state: Mutex<StageState>,
}

impl StageCounters {
    /// Create zeroed counters in the `Idle` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `process()` call and return its 1-based number.
    pub fn record_process_call(&self) -> u64 {
        self.process_calls.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    pub fn record_completion(&self) {
        self.completions.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_broadcast(&self) {
        self.broadcasts.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_join_notification(&self) {
        self.join_notifications.fetch_add(1, Ordering::AcqRel);
    }

    #[must_use]
    pub fn process_calls(&self) -> u64 {
        self.process_calls.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn completions(&self) -> u64 {
        self.completions.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn broadcasts(&self) -> u64 {
        self.broadcasts.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn join_notifications(&self) -> u64 {
        self.join_notifications.load(Ordering::Acquire)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StageState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_state(&self, state: StageState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Mark the loop as ended with `exit`.
    pub fn terminate(&self, exit: StageExit) {
        self.set_state(StageState::Terminated { exit });
    }

    /// Take a serializable snapshot labelled with `name`.
    #[must_use]
    pub fn snapshot(&self, name: &str) -> StageMetrics {
        StageMetrics {
            name: name.to_string(),
            process_calls: self.process_calls(),
            completions: self.completions(),
            broadcasts: self.broadcasts(),
            join_notifications: self.join_notifications(),
            state: self.state(),
        }
    }
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// Point-in-time view of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub name: String,
    pub process_calls: u64,
    pub completions: u64,
    pub broadcasts: u64,
    pub join_notifications: u64,
    pub state: StageState,
}

impl StageMetrics {
    /// Number of `process()` calls that did not complete successfully.
    ///
    /// At most 1: a failing call ends the loop.
    #[must_use]
    pub fn failed_calls(&self) -> u64 {
        self.process_calls.saturating_sub(self.completions)
    }
}

/// Point-in-time view of a whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    /// Number of times the lattice head fired.
    pub trigger_fired: u64,
    /// Completed fan-in rounds, if the pipeline has a fusion.
    pub fusion_rounds: Option<u64>,
    /// Per-stage snapshots in stage order.
    pub stages: Vec<StageMetrics>,
}

impl PipelineMetrics {
    /// Number of stages whose thread is executing the run loop.
    #[must_use]
    pub fn running(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.state == StageState::Running)
            .count()
    }

    /// Number of stages whose loop has ended.
    #[must_use]
    pub fn terminated(&self) -> usize {
        self.stages.iter().filter(|s| s.state.is_terminated()).count()
    }

    /// Total successful iterations across all stages.
    #[must_use]
    pub fn total_completions(&self) -> u64 {
        self.stages
            .iter()
            .fold(0u64, |acc, s| acc.saturating_add(s.completions))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_call_numbers_are_one_based() {
        let counters = StageCounters::new();
        assert_eq!(counters.record_process_call(), 1);
        assert_eq!(counters.record_process_call(), 2);
        assert_eq!(counters.process_calls(), 2);
    }

    #[test]
    fn snapshot_reports_failed_call() {
        let counters = StageCounters::new();
        counters.record_process_call();
        counters.record_completion();
        counters.record_broadcast();
        counters.record_process_call();
        counters.terminate(StageExit::ProcessFailed {
            call: 2,
            reason: "overrun".to_string(),
        });

        let metrics = counters.snapshot("gain");
        assert_eq!(metrics.name, "gain");
        assert_eq!(metrics.failed_calls(), 1);
        assert!(metrics.state.is_terminated());
    }

    #[test]
    fn pipeline_metrics_aggregate() {
        let running = StageCounters::new();
        running.set_state(StageState::Running);
        running.record_completion();
        let done = StageCounters::new();
        done.terminate(StageExit::NoPredecessor);
        done.record_completion();
        done.record_completion();

        let metrics = PipelineMetrics {
            trigger_fired: 2,
            fusion_rounds: None,
            stages: vec![running.snapshot("a"), done.snapshot("b")],
        };
        assert_eq!(metrics.running(), 1);
        assert_eq!(metrics.terminated(), 1);
        assert_eq!(metrics.total_completions(), 3);
    }

    #[test]
    fn metrics_serialize_with_tagged_state() {
        let counters = StageCounters::new();
        counters.terminate(StageExit::Cancelled);
        let json = serde_json::to_string(&counters.snapshot("tap")).expect("serialize");
        assert!(json.contains("\"state\":\"terminated\""));
        assert!(json.contains("\"kind\":\"cancelled\""));
    }
}
