//! Shared plumbing for the dashboard and record views.
//!
//! A view publishes immutable state snapshots through a `watch` channel. Every mutation goes
//! through [`ViewCore::update`] or [`ViewCore::update_versioned`], which check the stopped
//! flag (and, for versioned updates, the highest applied version) under the same lock that
//! guards publication. Once `stop` has returned nothing can change the published state, and
//! every pending [`ViewCore::wait_until`] has been released with the final snapshot.

use crate::subscription::{StopSummary, SubscriptionManager};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

pub(crate) struct ViewCore<T> {
    name: &'static str,
    state: watch::Sender<T>,
    gate: Mutex<Gate>,
    halted: watch::Sender<bool>,
    manager: SubscriptionManager,
}

#[derive(Default)]
struct Gate {
    stopped: bool,
    applied: u64,
}

impl<T: Clone> ViewCore<T> {
    pub(crate) fn new(name: &'static str, initial: T) -> Self {
        let (state, _) = watch::channel(initial);
        let (halted, _) = watch::channel(false);
        Self {
            name,
            state,
            gate: Mutex::new(Gate::default()),
            halted,
            manager: SubscriptionManager::new(),
        }
    }

    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn manager(&self) -> &SubscriptionManager {
        &self.manager
    }

    pub(crate) fn snapshot(&self) -> T {
        self.state.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<T> {
        self.state.subscribe()
    }

    /// Applies `f` to the published state unless the view has stopped.
    pub(crate) fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let gate = self.gate();
        if gate.stopped {
            tracing::debug!(view = self.name, "ignoring update after stop");
            return false;
        }
        self.state.send_modify(f);
        drop(gate);
        true
    }

    /// Applies `f` only if `version` is newer than every version applied so far.
    pub(crate) fn update_versioned(&self, version: u64, f: impl FnOnce(&mut T)) -> bool {
        let mut gate = self.gate();
        if gate.stopped {
            tracing::debug!(view = self.name, version, "discarding result after stop");
            return false;
        }
        if version <= gate.applied {
            tracing::debug!(
                view = self.name,
                version,
                applied = gate.applied,
                "discarding stale result"
            );
            return false;
        }
        gate.applied = version;
        self.state.send_modify(f);
        true
    }

    /// Waits until `done` holds for the published state. Returns the current state instead
    /// once the view stops, whether it stopped before or during the wait.
    pub(crate) async fn wait_until(&self, mut done: impl FnMut(&T) -> bool) -> T {
        let mut rx = self.subscribe();
        let mut halted = self.halted.subscribe();
        let found = tokio::select! {
            found = rx.wait_for(|state| done(state)) => found.ok().map(|state| state.clone()),
            _ = halted.wait_for(|stopped| *stopped) => None,
        };
        found.unwrap_or_else(|| self.snapshot())
    }

    pub(crate) fn stop(&self) -> StopSummary {
        {
            let mut gate = self.gate();
            if gate.stopped {
                return StopSummary::default();
            }
            gate.stopped = true;
        }
        self.halted.send_replace(true);
        let summary = self.manager.stop();
        tracing::info!(
            view = self.name,
            released = summary.released,
            failed = summary.failed,
            "view stopped"
        );
        summary
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.gate().stopped
    }
}
