//! # Runtime Primitives
//!
//! Fixed constants of the Fission runtime.

use std::time::Duration;

/// Name of the pipeline's lattice head.
///
/// Stage configurations use this value in `after` to chain a stage to the
/// trigger instead of to another stage. No stage may take this name.
pub const TRIGGER_NAME: &str = "trigger";

/// Prefix of every stage thread name (`fission:<stage>`).
pub const THREAD_NAME_PREFIX: &str = "fission:";

/// Smallest stack size accepted for a stage thread (64 KiB).
///
/// Smaller values are raised to this floor before the thread is spawned.
pub const MIN_STACK_SIZE: usize = 64 * 1024;

/// Maximum number of stages in a single pipeline.
///
/// One OS thread is created per stage.
pub const MAX_STAGES: usize = 1024;

/// Maximum length of a stage name.
pub const MAX_STAGE_NAME_LENGTH: usize = 64;

/// Longest time `Pipeline::start()` waits for its stages to park.
pub const START_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Slice of one blocking wait while polling stages for readiness.
///
/// Stages can exit while a pipeline waits for them, so readiness is
/// re-evaluated at least this often.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(1);
