//! # fission-core
//!
//! Thread-per-stage pipelines synchronised by broadcast signals - THE PROTOCOL.
//!
//! Every stage runs on its own OS thread and talks to its neighbours through
//! one primitive only: a broadcast wait/wake signal. A stage waits on its
//! predecessor's signal, processes, wakes everyone waiting on its own signal,
//! and optionally fuses into a fan-in join. There are no queues between
//! stages and no backpressure.
//!
//! ## Building Blocks
//!
//! - `signal` → [`BroadcastSignal`], [`Trigger`] (lossy or counted wakes)
//! - `stage` → [`Stage`] running a [`Processable`]
//! - `join` → [`Fusion`] with a pluggable [`FusionRule`]
//! - `runner` → [`ThreadRunner`] owning the stage thread
//! - `pipeline` → [`Pipeline`] lattices built by hand or from [`PipelineConfig`]
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies (pure Rust, `std::sync` only)
//! - Stages never own their predecessor or join target
//! - Termination never propagates unless a stage is configured to close its
//!   signal on exit

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod join;
pub mod pipeline;
pub mod primitives;
pub mod runner;
pub mod signal;
pub mod slot;
pub mod stage;
pub mod system;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    FissionError, SignalMode, StageExit, StageId, StageState, TerminationPolicy, WaitOutcome,
};

// =============================================================================
// RE-EXPORTS: Protocol
// =============================================================================

pub use join::{Fusion, FusionRule, JoinBarrier};
pub use runner::ThreadRunner;
pub use signal::{BroadcastSignal, Signal, Trigger, Upstream, WaitCursor};
pub use slot::Slot;
pub use stage::{Processable, Stage};

// =============================================================================
// RE-EXPORTS: Assembly
// =============================================================================

pub use config::{PipelineConfig, PipelineSettings, StageSpec};
pub use pipeline::{Pipeline, StageReport};

// =============================================================================
// RE-EXPORTS: System (from system module)
// =============================================================================

pub use system::{PipelineMetrics, StageCounters, StageMetrics};
