//! Ownership of a view's live subscriptions.
//!
//! Every listener a view opens, and every background task it spawns, is registered with one
//! [`SubscriptionManager`]. The manager is the only holder of the cancellation handles, so
//! each is invoked exactly once: on `stop()`, or immediately if it is registered after the
//! view has already stopped.

use crate::error::StoreError;
use crate::store::Cancel;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

/// Outcome of a [`SubscriptionManager::stop`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StopSummary {
    /// Handles released cleanly.
    pub released: usize,
    /// Handles whose cancellation returned an error or panicked.
    pub failed: usize,
}

#[derive(Default)]
pub struct SubscriptionManager {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    stopped: bool,
    handles: Vec<(String, Cancel)>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes ownership of a cancellation handle.
    ///
    /// If the manager has already stopped, the handle is cancelled right away and `false`
    /// is returned.
    pub fn register(&self, name: impl Into<String>, cancel: Cancel) -> bool {
        let name = name.into();
        let mut inner = self.lock();
        if inner.stopped {
            drop(inner);
            tracing::debug!(subscription = %name, "registered after stop, cancelling");
            run_cancel(&name, cancel);
            return false;
        }
        inner.handles.push((name, cancel));
        true
    }

    /// Registers a spawned task; stopping the manager aborts it.
    pub fn register_task<T: Send + 'static>(
        &self,
        name: impl Into<String>,
        task: JoinHandle<T>,
    ) -> bool {
        let abort = task.abort_handle();
        self.register(
            name,
            Box::new(move || {
                abort.abort();
                Ok::<(), StoreError>(())
            }),
        )
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Number of handles currently held.
    pub fn len(&self) -> usize {
        self.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases every held handle in registration order. Idempotent.
    ///
    /// A failing or panicking cancellation is logged and does not prevent the remaining
    /// handles from being released.
    pub fn stop(&self) -> StopSummary {
        let handles = {
            let mut inner = self.lock();
            if inner.stopped {
                return StopSummary::default();
            }
            inner.stopped = true;
            std::mem::take(&mut inner.handles)
        };

        let mut summary = StopSummary::default();
        for (name, cancel) in handles {
            if run_cancel(&name, cancel) {
                summary.released += 1;
            } else {
                summary.failed += 1;
            }
        }
        tracing::debug!(
            released = summary.released,
            failed = summary.failed,
            "subscriptions stopped"
        );
        summary
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("SubscriptionManager")
            .field("stopped", &inner.stopped)
            .field("handles", &inner.handles.len())
            .finish()
    }
}

fn run_cancel(name: &str, cancel: Cancel) -> bool {
    match catch_unwind(AssertUnwindSafe(cancel)) {
        Ok(Ok(())) => {
            tracing::debug!(subscription = %name, "released");
            true
        }
        Ok(Err(e)) => {
            tracing::warn!(subscription = %name, error = %e, "failed to release subscription");
            false
        }
        Err(_) => {
            tracing::warn!(subscription = %name, "subscription cancellation panicked");
            false
        }
    }
}
