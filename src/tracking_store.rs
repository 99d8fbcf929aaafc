use std::sync::{Mutex, MutexGuard};

use crate::error::{lock_poisoned, TrackerResult};
use crate::observable::{Observable, Subscription};
use crate::types::TrackingState;

struct StoreInner {
    state: Observable<TrackingState>,
    running: Observable<bool>,
}

/// Live state of the in-progress session plus the service-running flag.
///
/// Both live behind one lock: the running check in [`update_state`] and the
/// mutation it guards happen atomically with respect to start, stop and every
/// other mutator.
///
/// [`update_state`]: TrackingStore::update_state
pub struct TrackingStore {
    inner: Mutex<StoreInner>,
}

impl TrackingStore {
    pub fn new() -> Self {
        TrackingStore {
            inner: Mutex::new(StoreInner {
                state: Observable::new(TrackingState::default()),
                running: Observable::new(false),
            }),
        }
    }

    fn lock(&self) -> TrackerResult<MutexGuard<'_, StoreInner>> {
        self.inner.lock().map_err(|_| lock_poisoned("tracking store"))
    }

    /// Reset to a zeroed state and raise the running flag. Calling this while
    /// already running discards the in-flight state.
    pub fn start_tracking(&self) -> TrackerResult<()> {
        let mut inner = self.lock()?;
        inner.state.set(TrackingState::default());
        if !*inner.running.get() {
            inner.running.set(true);
        }
        Ok(())
    }

    /// Lower the running flag. The final state stays readable until the next
    /// [`start_tracking`](Self::start_tracking).
    pub fn stop_tracking(&self) -> TrackerResult<()> {
        let mut inner = self.lock()?;
        if *inner.running.get() {
            inner.running.set(false);
        }
        Ok(())
    }

    /// Apply `mutator` if and only if a session is running.
    /// Returns whether it was applied.
    pub fn update_state<F>(&self, mutator: F) -> TrackerResult<bool>
    where
        F: FnOnce(&mut TrackingState),
    {
        let mut inner = self.lock()?;
        if !*inner.running.get() {
            return Ok(false);
        }
        inner.state.update(mutator);
        Ok(true)
    }

    /// Same guard as [`update_state`](Self::update_state); observers are only
    /// notified when the mutator returns `true`.
    pub fn update_state_if<F>(&self, mutator: F) -> TrackerResult<bool>
    where
        F: FnOnce(&mut TrackingState) -> bool,
    {
        let mut inner = self.lock()?;
        if !*inner.running.get() {
            return Ok(false);
        }
        Ok(inner.state.update_if(mutator))
    }

    pub fn state(&self) -> TrackerResult<TrackingState> {
        Ok(self.lock()?.state.get().clone())
    }

    pub fn is_running(&self) -> TrackerResult<bool> {
        Ok(*self.lock()?.running.get())
    }

    pub fn subscribe_state(&self) -> TrackerResult<Subscription<TrackingState>> {
        Ok(self.lock()?.state.subscribe())
    }

    pub fn subscribe_running(&self) -> TrackerResult<Subscription<bool>> {
        Ok(self.lock()?.running.subscribe())
    }
}

impl Default for TrackingStore {
    fn default() -> Self {
        Self::new()
    }
}
