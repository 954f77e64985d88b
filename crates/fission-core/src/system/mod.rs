//! # System Module
//!
//! Stage counters and pipeline metrics.
//!
//! Counters are written by the stage thread and read from anywhere; every
//! read is a point-in-time observation, not a consistent snapshot across
//! stages.

mod metrics;

pub use metrics::*;
