//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the Fission protocol:
//! - Stage identifiers (`StageId`)
//! - Protocol modes (`SignalMode`, `TerminationPolicy`)
//! - Lifecycle records (`StageState`, `StageExit`, `WaitOutcome`)
//! - Error types (`FissionError`)

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Index of a stage inside a [`crate::Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StageId(pub usize);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// PROTOCOL MODES
// =============================================================================

/// How a broadcast signal treats wakes raised while a waiter is not blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalMode {
    /// Futex-like: a wake only releases threads blocked at that moment.
    /// Several completions between two waits collapse into one.
    #[default]
    Lossy,
    /// Every wake raised after a waiter's cursor was taken is delivered to
    /// that waiter exactly once.
    Counted,
}

/// What a stage does with its own signal when its loop ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationPolicy {
    /// Leave the signal open. Downstream stages block forever.
    #[default]
    Silent,
    /// Close the signal so downstream stages exit with `UpstreamClosed`.
    Propagate,
}

// =============================================================================
// LIFECYCLE RECORDS
// =============================================================================

/// Result of one blocking wait on a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A broadcast was observed.
    Woken,
    /// The signal was closed; no further broadcasts will come.
    Closed,
    /// The waiter's cancellation flag was raised.
    Cancelled,
}

/// Why a stage's run loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageExit {
    /// The predecessor was absent (or dropped) at the top of the loop.
    NoPredecessor,
    /// `process()` failed on the given call (1-based).
    ProcessFailed { call: u64, reason: String },
    /// The stage was cancelled from outside.
    Cancelled,
    /// The predecessor closed its signal.
    UpstreamClosed,
}

impl fmt::Display for StageExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageExit::NoPredecessor => write!(f, "no predecessor"),
            StageExit::ProcessFailed { call, reason } => {
                write!(f, "process failed on call {}: {}", call, reason)
            }
            StageExit::Cancelled => write!(f, "cancelled"),
            StageExit::UpstreamClosed => write!(f, "upstream closed"),
        }
    }
}

/// Observable lifecycle state of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StageState {
    /// Constructed or joined, thread not running.
    #[default]
    Idle,
    /// Thread is executing the run loop.
    Running,
    /// Run loop ended; the exit is recorded until the next start.
    Terminated { exit: StageExit },
}

impl StageState {
    /// Check whether the run loop has ended.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(self, StageState::Terminated { .. })
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while building, starting or joining stages.
///
/// A failing `process()` is reported through this type by the stage
/// implementation, but the run loop never surfaces it while running: it only
/// ends the loop and is recorded in the [`StageExit`].
#[derive(Debug, Error)]
pub enum FissionError {
    /// The stage thread is already running.
    #[error("Stage is already running")]
    AlreadyRunning,

    /// The stage thread was never started.
    #[error("Stage has not been started")]
    NotStarted,

    /// The operating system refused to create the thread.
    #[error("Thread spawn failed: {0}")]
    ThreadSpawn(String),

    /// The stage thread panicked.
    #[error("Thread panicked: {0}")]
    ThreadPanicked(String),

    /// A stage name or id did not resolve.
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// Two stages share the same name.
    #[error("Duplicate stage: {0}")]
    DuplicateStage(String),

    /// A pipeline configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A processing step requested shutdown of its stage.
    #[error("Process failed: {0}")]
    ProcessFailed(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_reproduce_futex_behaviour() {
        assert_eq!(SignalMode::default(), SignalMode::Lossy);
        assert_eq!(TerminationPolicy::default(), TerminationPolicy::Silent);
        assert_eq!(StageState::default(), StageState::Idle);
    }

    #[test]
    fn stage_exit_display() {
        let exit = StageExit::ProcessFailed {
            call: 3,
            reason: "bad frame".to_string(),
        };
        assert_eq!(exit.to_string(), "process failed on call 3: bad frame");
        assert_eq!(StageExit::NoPredecessor.to_string(), "no predecessor");
    }

    #[test]
    fn stage_exit_serializes_kind_and_reason() {
        let exit = StageExit::ProcessFailed {
            call: 2,
            reason: "underrun".to_string(),
        };
        let json = serde_json::to_string(&exit).expect("serialize");
        assert!(json.contains("\"kind\":\"process_failed\""));
        assert!(json.contains("\"reason\":\"underrun\""));

        let parsed: StageExit = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed, exit);
    }

    #[test]
    fn terminated_state_detection() {
        assert!(!StageState::Running.is_terminated());
        assert!(
            StageState::Terminated {
                exit: StageExit::Cancelled
            }
            .is_terminated()
        );
    }
}
