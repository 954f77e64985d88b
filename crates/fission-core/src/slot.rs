//! # Output Slot
//!
//! A shared cell a stage publishes its output into and its successors read
//! from after their `wait()` returns.
//!
//! The protocol itself never touches stage data. A slot only makes each
//! individual read and write atomic; it does not make a successor see every
//! value. A producer that runs again before its consumer has read will
//! overwrite the previous output. Stages that need every value must either
//! run under [`crate::SignalMode::Counted`] behind a fan-in that holds the
//! producer back, or carry their own buffering.

use std::sync::{Arc, PoisonError, RwLock};

/// Cloneable handle to a shared output value.
#[derive(Debug, Default)]
pub struct Slot<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Slot<T> {
    /// Create a slot holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(value)),
        }
    }

    /// Replace the slot's value.
    pub fn publish(&self, value: T) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Mutate the value in place.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Borrow the value for the duration of `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }
}

impl<T: Clone> Slot<T> {
    /// Clone the current value out of the slot.
    #[must_use]
    pub fn read(&self) -> T {
        self.with(T::clone)
    }
}
