//! A debugger handle that can be shared between threads.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::{ProcessDebugger, ProcessState};

/// [`ProcessDebugger`] behind a session-level mutex.
///
/// The lock serializes the whole control surface so only one request is in
/// flight at a time. Tracing requests are still bound to the thread that
/// launched or attached the process; other threads may inspect state,
/// breakpoints and the last error.
#[derive(Clone, Debug, Default)]
pub struct SharedDebugger {
    inner: Arc<Mutex<ProcessDebugger>>,
}

impl SharedDebugger {
    pub fn new(debugger: ProcessDebugger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(debugger)),
        }
    }

    /// Lock the debugger for a sequence of operations.
    pub fn lock(&self) -> MutexGuard<'_, ProcessDebugger> {
        self.inner.lock()
    }

    /// Run `f` with exclusive access.
    pub fn with<R>(&self, f: impl FnOnce(&mut ProcessDebugger) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Run `f` unless another request is in flight.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut ProcessDebugger) -> R) -> Option<R> {
        self.inner.try_lock().map(|mut guard| f(&mut guard))
    }

    pub fn current_state(&self) -> ProcessState {
        self.inner.lock().current_state()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error().map(str::to_string)
    }
}
