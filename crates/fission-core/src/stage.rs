//! # Processing Stage
//!
//! A stage owns one broadcast signal and one thread runner. Its thread
//! repeats:
//!
//! 1. stop if the predecessor is absent or dropped
//! 2. wait on the predecessor's signal
//! 3. run `process()`; stop for good if it fails
//! 4. wake everything waiting on this stage
//! 5. fuse the join target, if attached
//!
//! Predecessor and join target are held as `Weak` references: the stage never
//! keeps them alive. Whoever builds the pipeline keeps linked stages alive for
//! as long as their threads run.
//!
//! ## Termination
//!
//! Stopping does not propagate by default. When stage K stops, stage K+1 keeps
//! waiting on K's signal and never wakes. [`TerminationPolicy::Propagate`]
//! closes the stopped stage's signal instead, releasing its successors with
//! [`StageExit::UpstreamClosed`]. [`Stage::cancel`] stops a stage from outside,
//! including while it is blocked in `wait()`.

use crate::join::JoinBarrier;
use crate::runner::ThreadRunner;
use crate::signal::{BroadcastSignal, Signal, Upstream, WaitCursor};
use crate::system::{StageCounters, StageMetrics};
use crate::{FissionError, SignalMode, StageExit, StageState, TerminationPolicy, WaitOutcome};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

// =============================================================================
// PROCESS CONTRACT
// =============================================================================

/// The unit of work a stage runs once per observed predecessor completion.
///
/// Implementations read their predecessor's output, produce their own, and
/// return. They are called repeatedly in sequence, must not block
/// indefinitely (a blocked stage stalls everything downstream), and return
/// `Err` only to shut the stage down permanently.
pub trait Processable: Send {
    fn process(&mut self) -> Result<(), FissionError>;
}

impl<F> Processable for F
where
    F: FnMut() -> Result<(), FissionError> + Send,
{
    fn process(&mut self) -> Result<(), FissionError> {
        self()
    }
}

// =============================================================================
// LINKS
// =============================================================================

#[derive(Default)]
struct StageLinks {
    predecessor: RwLock<Option<Weak<dyn Signal>>>,
    join: RwLock<Option<Weak<dyn JoinBarrier>>>,
}

impl StageLinks {
    fn predecessor(&self) -> Option<Weak<dyn Signal>> {
        self.predecessor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_predecessor(&self, predecessor: Option<Weak<dyn Signal>>) {
        *self
            .predecessor
            .write()
            .unwrap_or_else(PoisonError::into_inner) = predecessor;
    }

    fn join(&self) -> Option<Arc<dyn JoinBarrier>> {
        self.join
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn set_join(&self, join: Option<Weak<dyn JoinBarrier>>) {
        *self.join.write().unwrap_or_else(PoisonError::into_inner) = join;
    }
}

// =============================================================================
// STAGE
// =============================================================================

/// One thread of a broadcast-synchronised pipeline.
pub struct Stage {
    name: String,
    signal: Arc<BroadcastSignal>,
    links: Arc<StageLinks>,
    counters: Arc<StageCounters>,
    cancel: Arc<AtomicBool>,
    policy: TerminationPolicy,
    processor: Arc<Mutex<Box<dyn Processable>>>,
    runner: ThreadRunner<StageExit>,
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("mode", &self.signal.mode())
            .field("policy", &self.policy)
            .field("state", &self.counters.state())
            .finish()
    }
}

impl Stage {
    /// Create an idle stage with no predecessor and no join target.
    pub fn new(name: impl Into<String>, processor: impl Processable + 'static) -> Self {
        Self::boxed(name, Box::new(processor))
    }

    /// Create an idle stage from an already boxed processor.
    pub fn boxed(name: impl Into<String>, processor: Box<dyn Processable>) -> Self {
        let name = name.into();
        Self {
            runner: ThreadRunner::new(name.clone()),
            name,
            signal: Arc::new(BroadcastSignal::default()),
            links: Arc::new(StageLinks::default()),
            counters: Arc::new(StageCounters::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            policy: TerminationPolicy::default(),
            processor: Arc::new(Mutex::new(processor)),
        }
    }

    /// Use a fresh signal with `mode`. Call before any successor is linked.
    #[must_use]
    pub fn with_signal_mode(mut self, mode: SignalMode) -> Self {
        self.signal = Arc::new(BroadcastSignal::new(mode));
        self
    }

    #[must_use]
    pub fn with_termination(mut self, policy: TerminationPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_stack_size(mut self, stack_size: Option<usize>) -> Self {
        self.runner = ThreadRunner::new(self.name.clone()).with_stack_size(stack_size);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The signal this stage broadcasts after each successful iteration.
    pub fn signal(&self) -> &Arc<BroadcastSignal> {
        &self.signal
    }

    pub fn policy(&self) -> TerminationPolicy {
        self.policy
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    /// Wait on `upstream` from the next iteration on. Cycles are not detected.
    pub fn attach_predecessor<U: Upstream + ?Sized>(&self, upstream: &U) {
        let signal = upstream.upstream_signal();
        self.links.set_predecessor(Some(Arc::downgrade(&signal)));
    }

    /// Forget the predecessor. A running loop stops at its next check.
    pub fn detach_predecessor(&self) {
        self.links.set_predecessor(None);
    }

    /// Check whether a live predecessor is attached.
    pub fn has_predecessor(&self) -> bool {
        self.links
            .predecessor()
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// The signal this stage waits on, if it is still alive.
    pub fn predecessor_signal(&self) -> Option<Arc<dyn Signal>> {
        self.links.predecessor().and_then(|weak| weak.upgrade())
    }

    /// Fuse `target` once per successful iteration.
    pub fn attach_join<J: JoinBarrier + 'static>(&self, target: &Arc<J>) {
        let weak: Weak<J> = Arc::downgrade(target);
        self.links.set_join(Some(weak));
    }

    pub fn detach_join(&self) {
        self.links.set_join(None);
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Spawn the stage thread.
    ///
    /// The wait cursor on the current predecessor is taken here, on the
    /// calling thread, so a counted predecessor's broadcasts raised after
    /// `start()` returns are all seen by this stage.
    pub fn start(&mut self) -> Result<(), FissionError> {
        if self.runner.is_started() {
            return Err(FissionError::AlreadyRunning);
        }

        self.cancel.store(false, Ordering::Release);
        let watched = self
            .links
            .predecessor()
            .and_then(|weak| weak.upgrade().map(|signal| (weak, signal.cursor())));

        let context = RunContext {
            name: self.name.clone(),
            signal: Arc::clone(&self.signal),
            links: Arc::clone(&self.links),
            counters: Arc::clone(&self.counters),
            cancel: Arc::clone(&self.cancel),
            policy: self.policy,
            processor: Arc::clone(&self.processor),
            watched,
        };

        self.counters.set_state(StageState::Running);
        if let Err(e) = self.runner.start(move || context.run()) {
            self.counters.set_state(StageState::Idle);
            return Err(e);
        }
        tracing::debug!(stage = %self.name, "stage thread started");
        Ok(())
    }

    /// Check whether a thread was started and not yet joined.
    pub fn is_started(&self) -> bool {
        self.runner.is_started()
    }

    /// Check whether the thread is executing the run loop.
    pub fn is_running(&self) -> bool {
        self.runner.is_started() && !self.runner.is_finished()
    }

    /// Stop the stage cooperatively, even while it is blocked in `wait()`.
    ///
    /// Interrupting the predecessor's signal also wakes sibling stages
    /// waiting on it; they park again without processing.
    pub fn cancel(&self) {
        self.raise_cancel();
        self.interrupt_wait();
    }

    pub(crate) fn raise_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub(crate) fn interrupt_wait(&self) {
        if let Some(signal) = self.predecessor_signal() {
            signal.interrupt();
        }
    }

    /// Block until the thread ends and return why its loop stopped.
    ///
    /// The stage can be started again afterwards.
    pub fn join(&mut self) -> Result<StageExit, FissionError> {
        let result = self.runner.join();
        if result.is_err() {
            self.counters.set_state(StageState::Idle);
        }
        result
    }

    // -------------------------------------------------------------------------
    // Observation
    // -------------------------------------------------------------------------

    pub fn state(&self) -> StageState {
        self.counters.state()
    }

    pub fn process_calls(&self) -> u64 {
        self.counters.process_calls()
    }

    /// Successful `process()` calls so far.
    pub fn completions(&self) -> u64 {
        self.counters.completions()
    }

    pub fn join_notifications(&self) -> u64 {
        self.counters.join_notifications()
    }

    pub fn metrics(&self) -> StageMetrics {
        self.counters.snapshot(&self.name)
    }
}

impl Upstream for Stage {
    fn upstream_signal(&self) -> Arc<dyn Signal> {
        self.signal.clone()
    }
}

// =============================================================================
// RUN LOOP
// =============================================================================

struct RunContext {
    name: String,
    signal: Arc<BroadcastSignal>,
    links: Arc<StageLinks>,
    counters: Arc<StageCounters>,
    cancel: Arc<AtomicBool>,
    policy: TerminationPolicy,
    processor: Arc<Mutex<Box<dyn Processable>>>,
    watched: Option<(Weak<dyn Signal>, WaitCursor)>,
}

impl RunContext {
    fn run(mut self) -> StageExit {
        let shared = Arc::clone(&self.processor);
        let mut processor = shared.lock().unwrap_or_else(PoisonError::into_inner);

        let exit = loop {
            if self.cancel.load(Ordering::Acquire) {
                break StageExit::Cancelled;
            }

            let Some(weak) = self.links.predecessor() else {
                break StageExit::NoPredecessor;
            };
            let Some(upstream) = weak.upgrade() else {
                break StageExit::NoPredecessor;
            };

            // A new predecessor starts from its current generation.
            let mut cursor = match self.watched.take() {
                Some((watched, cursor)) if Weak::ptr_eq(&watched, &weak) => cursor,
                _ => upstream.cursor(),
            };
            let outcome = upstream.wait(&mut cursor, &self.cancel);
            self.watched = Some((weak, cursor));
            drop(upstream);

            match outcome {
                WaitOutcome::Woken => {}
                WaitOutcome::Closed if self.cancel.load(Ordering::Acquire) => {
                    break StageExit::Cancelled;
                }
                WaitOutcome::Closed => break StageExit::UpstreamClosed,
                WaitOutcome::Cancelled => break StageExit::Cancelled,
            }

            let call = self.counters.record_process_call();
            if let Err(e) = processor.process() {
                break StageExit::ProcessFailed {
                    call,
                    reason: e.to_string(),
                };
            }
            self.counters.record_completion();

            self.signal.wake_all();
            self.counters.record_broadcast();

            if let Some(join) = self.links.join() {
                join.fuse();
                self.counters.record_join_notification();
            }
        };

        if self.policy == TerminationPolicy::Propagate {
            self.signal.close();
        }

        match &exit {
            StageExit::ProcessFailed { .. } => {
                tracing::warn!(stage = %self.name, %exit, "stage stopped");
            }
            _ => {
                tracing::info!(stage = %self.name, %exit, "stage stopped");
            }
        }
        self.counters.terminate(exit.clone());
        exit
    }
}

// =============================================================================
// TESTS
// =============================================================================
