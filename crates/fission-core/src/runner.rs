//! # Thread Runner
//!
//! Owns the dedicated OS thread of one stage: spawning it with a name and
//! stack size, and joining it from outside.

use crate::FissionError;
use crate::primitives::{MIN_STACK_SIZE, THREAD_NAME_PREFIX};
use std::any::Any;
use std::thread::{self, JoinHandle};

/// Spawns a body on a named thread and joins it later.
///
/// A runner holds at most one thread. It can be started again once the
/// previous thread has been joined.
#[derive(Debug)]
pub struct ThreadRunner<T> {
    name: String,
    stack_size: Option<usize>,
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> ThreadRunner<T> {
    /// Create an idle runner. The thread is named `fission:<name>`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack_size: None,
            handle: None,
        }
    }

    /// Set the stack size of threads spawned by this runner.
    ///
    /// Values below [`MIN_STACK_SIZE`] are raised to it.
    #[must_use]
    pub fn with_stack_size(mut self, stack_size: Option<usize>) -> Self {
        self.stack_size = stack_size.map(|size| size.max(MIN_STACK_SIZE));
        self
    }

    /// The runner's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn `body` on a new thread.
    ///
    /// Fails with `AlreadyRunning` if a thread was started and not joined.
    pub fn start<F>(&mut self, body: F) -> Result<(), FissionError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        if self.handle.is_some() {
            return Err(FissionError::AlreadyRunning);
        }

        let mut builder =
            thread::Builder::new().name(format!("{}{}", THREAD_NAME_PREFIX, self.name));
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        let handle = builder
            .spawn(body)
            .map_err(|e| FissionError::ThreadSpawn(format!("{}: {}", self.name, e)))?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Check whether a thread has been started and not yet joined.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    /// Check whether the started thread has finished running.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_some_and(JoinHandle::is_finished)
    }

    /// Block until the thread ends and return its result.
    pub fn join(&mut self) -> Result<T, FissionError> {
        let handle = self.handle.take().ok_or(FissionError::NotStarted)?;
        handle
            .join()
            .map_err(|payload| FissionError::ThreadPanicked(panic_message(payload.as_ref())))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// =============================================================================
// TESTS
// =============================================================================
