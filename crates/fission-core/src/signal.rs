//! # Broadcast Signal
//!
//! The wait/wake primitive every stage synchronises through.
//!
//! A signal carries a monotonically increasing *generation*. `wake_all()`
//! bumps the generation and releases every blocked waiter; each waiter keeps
//! a [`WaitCursor`] with the last generation it observed.
//!
//! | Mode | Wake raised while nobody waits | Several wakes between two waits |
//! |------|-------------------------------|---------------------------------|
//! | `Lossy` | Lost | Collapse into one |
//! | `Counted` | Delivered on the next wait | Delivered one per wait |
//!
//! Closing a signal is terminal: current and future waiters return
//! [`WaitOutcome::Closed`] and further wakes are ignored.
//!
//! A signal also counts its *parked* waiters: threads blocked in `wait()`
//! that the next `wake_all()` is guaranteed to release. A driver firing a
//! lossy lattice waits for every stage to be parked first, see
//! [`crate::Pipeline::wait_ready`].

use crate::{SignalMode, WaitOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// =============================================================================
// SIGNAL CONTRACT
// =============================================================================

/// Blocking wait + broadcast wake.
pub trait Signal: Send + Sync {
    /// Block until a broadcast is observed, the signal closes, or `cancel`
    /// is raised (and the signal interrupted).
    fn wait(&self, cursor: &mut WaitCursor, cancel: &AtomicBool) -> WaitOutcome;

    /// Release every thread currently blocked in `wait()`.
    fn wake_all(&self);

    /// Release all waiters permanently.
    fn close(&self);

    /// Wake waiters without a broadcast so they re-check their cancel flag.
    ///
    /// Every waiter of the signal wakes, not only the cancelled one. The
    /// others find nothing to do and park again, so cancelling one stage of
    /// a wide fan-out costs one spurious wake per sibling.
    fn interrupt(&self);

    /// Number of broadcasts raised so far.
    fn generation(&self) -> u64;

    /// Check whether the signal has been closed.
    fn is_closed(&self) -> bool;

    /// Number of waiters the next broadcast is guaranteed to release.
    fn parked(&self) -> usize;

    /// Block until at least `count` waiters are parked.
    ///
    /// Returns `false` if that did not happen within `timeout`.
    fn wait_parked(&self, count: usize, timeout: Duration) -> bool;

    /// A cursor positioned at the current generation.
    fn cursor(&self) -> WaitCursor {
        WaitCursor::at(self.generation())
    }
}

/// Anything a stage can wait on.
pub trait Upstream {
    /// The signal broadcast on each completion.
    fn upstream_signal(&self) -> Arc<dyn Signal>;
}

/// Per-waiter record of the last observed generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitCursor {
    seen: u64,
}

impl WaitCursor {
    /// Create a cursor that has observed everything up to `generation`.
    #[must_use]
    pub const fn at(generation: u64) -> Self {
        Self { seen: generation }
    }

    /// The last generation observed through this cursor.
    #[must_use]
    pub const fn seen(&self) -> u64 {
        self.seen
    }
}

// =============================================================================
// BROADCAST SIGNAL
// =============================================================================

#[derive(Debug, Default)]
struct SignalState {
    generation: u64,
    closed: bool,
    /// Waiters blocked since the last broadcast. Reset by `wake_all()`.
    parked: usize,
}

/// Condvar-backed [`Signal`] supporting both [`SignalMode`]s.
#[derive(Debug)]
pub struct BroadcastSignal {
    mode: SignalMode,
    state: Mutex<SignalState>,
    wakeup: Condvar,
    parking: Condvar,
}

impl Default for BroadcastSignal {
    fn default() -> Self {
        Self::new(SignalMode::default())
    }
}

impl BroadcastSignal {
    /// Create an open signal at generation 0.
    #[must_use]
    pub fn new(mode: SignalMode) -> Self {
        Self {
            mode,
            state: Mutex::new(SignalState::default()),
            wakeup: Condvar::new(),
            parking: Condvar::new(),
        }
    }

    /// The delivery mode of this signal.
    #[must_use]
    pub fn mode(&self) -> SignalMode {
        self.mode
    }

    // A panicking waiter never leaves the state half-updated.
    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Signal for BroadcastSignal {
    fn wait(&self, cursor: &mut WaitCursor, cancel: &AtomicBool) -> WaitOutcome {
        let mut state = self.lock();

        if self.mode == SignalMode::Lossy {
            cursor.seen = state.generation;
        }

        // Generation at which this waiter was counted as parked.
        let mut parked_at: Option<u64> = None;

        loop {
            // Still counted unless a broadcast reset the count meanwhile.
            if parked_at.take() == Some(state.generation) {
                state.parked = state.parked.saturating_sub(1);
            }

            // A raised cancel flag takes precedence over a closed signal.
            if cancel.load(Ordering::Acquire) {
                return WaitOutcome::Cancelled;
            }
            if state.closed {
                return WaitOutcome::Closed;
            }
            if state.generation > cursor.seen {
                cursor.seen = match self.mode {
                    SignalMode::Lossy => state.generation,
                    SignalMode::Counted => cursor.seen.saturating_add(1),
                };
                return WaitOutcome::Woken;
            }

            state.parked = state.parked.saturating_add(1);
            parked_at = Some(state.generation);
            self.parking.notify_all();
            state = self
                .wakeup
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn wake_all(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.generation = state.generation.saturating_add(1);
        state.parked = 0;
        self.wakeup.notify_all();
    }

    fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.wakeup.notify_all();
    }

    fn interrupt(&self) {
        let _state = self.lock();
        self.wakeup.notify_all();
    }

    fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn parked(&self) -> usize {
        self.lock().parked
    }

    fn wait_parked(&self, count: usize, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .parking
            .wait_timeout_while(state, timeout, |s| s.parked < count)
            .unwrap_or_else(PoisonError::into_inner);
        state.parked >= count
    }
}

// =============================================================================
// TRIGGER
// =============================================================================

/// Stage-less signal source at the head of a lattice.
///
/// Firing the trigger releases every stage chained to it, the same way a
/// stage's completion releases its successors.
#[derive(Debug, Clone)]
pub struct Trigger {
    signal: Arc<BroadcastSignal>,
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new(SignalMode::default())
    }
}

impl Trigger {
    /// Create a trigger with the given delivery mode.
    #[must_use]
    pub fn new(mode: SignalMode) -> Self {
        Self {
            signal: Arc::new(BroadcastSignal::new(mode)),
        }
    }

    /// Wake every stage chained to this trigger.
    pub fn fire(&self) {
        self.signal.wake_all();
    }

    /// Close the trigger; chained stages exit with `UpstreamClosed`.
    pub fn close(&self) {
        self.signal.close();
    }

    /// Number of times the trigger has fired.
    #[must_use]
    pub fn fired(&self) -> u64 {
        self.signal.generation()
    }

    /// The underlying signal.
    #[must_use]
    pub fn signal(&self) -> &Arc<BroadcastSignal> {
        &self.signal
    }
}

impl Upstream for Trigger {
    fn upstream_signal(&self) -> Arc<dyn Signal> {
        self.signal.clone()
    }
}

// =============================================================================
// TESTS
// =============================================================================
