//! Active/destroyed state of a client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use super::error::{WorkerError, WorkerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Active,
    Destroyed,
}

/// One-way `Active -> Destroyed` gate consulted by every public operation.
///
/// Teardown starts before the state flips: once [`begin_teardown`] returns,
/// [`while_open`] refuses to run, so nothing is added to the function
/// registries after they are cleared.
///
/// [`begin_teardown`]: Lifecycle::begin_teardown
/// [`while_open`]: Lifecycle::while_open
#[derive(Debug, Default)]
pub struct Lifecycle {
    destroyed: AtomicBool,
    closing: RwLock<bool>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        if self.destroyed.load(Ordering::Acquire) {
            LifecycleState::Destroyed
        } else {
            LifecycleState::Active
        }
    }

    /// Fail with [`WorkerError::Destroyed`] once the client is torn down.
    pub fn ensure_active(&self) -> WorkerResult<()> {
        match self.state() {
            LifecycleState::Active => Ok(()),
            LifecycleState::Destroyed => Err(WorkerError::Destroyed),
        }
    }

    /// Run `f` unless teardown has begun.
    ///
    /// Holds the teardown lock for the duration of `f`, so `f` either
    /// completes before [`Lifecycle::begin_teardown`] or not at all.
    pub(crate) fn while_open<T>(&self, f: impl FnOnce() -> T) -> WorkerResult<T> {
        let closing = self.closing.read().unwrap_or_else(PoisonError::into_inner);
        if *closing || self.destroyed.load(Ordering::Acquire) {
            return Err(WorkerError::Destroyed);
        }
        Ok(f())
    }

    /// Close the gate used by [`Lifecycle::while_open`]. The reported state
    /// stays `Active` until [`Lifecycle::mark_destroyed`].
    pub(crate) fn begin_teardown(&self) {
        *self.closing.write().unwrap_or_else(PoisonError::into_inner) = true;
    }

    /// Flip to `Destroyed`. Irreversible.
    pub(crate) fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}
