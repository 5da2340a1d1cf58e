//! Interrupt token shared by every scenario of a run.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::error;

type Listener = Box<dyn Fn(&str) + Send + Sync>;

/// Stops forward progress of running scenarios.
///
/// The runner checks the token between stages, so a stage already applying
/// finishes and its teardown still runs. Only the first reason is kept.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
    listeners: Mutex<Vec<Listener>>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels with `reason` and notifies listeners.
    ///
    /// Returns false if the token was already cancelled.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let reason = reason.into();
        *self.reason.lock() = Some(reason.clone());

        let listeners = std::mem::take(&mut *self.listeners.lock());
        for listener in &listeners {
            notify_listener(listener, &reason);
        }
        true
    }

    /// Calls `listener` with the reason once the token is cancelled.
    ///
    /// Runs it right away if the token is already cancelled.
    pub fn on_cancel<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock();
        match self.reason() {
            Some(reason) => {
                drop(listeners);
                notify_listener(&listener, &reason);
            }
            None => listeners.push(Box::new(listener)),
        }
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}

fn notify_listener(listener: &(dyn Fn(&str) + Send + Sync), reason: &str) {
    if catch_unwind(AssertUnwindSafe(|| listener(reason))).is_err() {
        error!(%reason, "cancellation listener panicked");
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("reason", &self.reason())
            .finish_non_exhaustive()
    }
}
