//! Cancellation of observations.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use tracing::debug;
use vigil_core::Region;

use crate::change_tracker::{ChangeTracker, ObserverId};

/// Cancellation state shared by an observer and its cancellable.
///
/// Deliveries run behind the same gate as `cancel`: once `cancel` returns,
/// no delivery is running and none starts. The gate is reentrant, so a
/// callback may cancel its own observation.
#[derive(Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
    gate: Arc<ReentrantMutex<()>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Returns true if this call cancelled.
    ///
    /// Waits for a delivery running on another thread.
    pub fn cancel(&self) -> bool {
        let _gate = self.gate.lock();
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Runs `f` unless the flag is set.
    pub fn run_unless_cancelled<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let _gate = self.gate.lock();
        if self.is_cancelled() {
            return None;
        }
        Some(f())
    }
}

impl fmt::Debug for CancelFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelFlag")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A handle on a started observation.
///
/// Cancelling, explicitly or by dropping the handle, stops the observation:
/// no value or error is delivered once `cancel` has returned. A delivery
/// running on another thread delays `cancel` until it completes.
#[must_use = "dropping a DatabaseCancellable cancels the observation"]
#[derive(Debug)]
pub struct DatabaseCancellable {
    id: Option<ObserverId>,
    flag: CancelFlag,
    tracker: Weak<ChangeTracker>,
    region: Arc<Mutex<Region>>,
}

impl DatabaseCancellable {
    pub(crate) fn new(
        id: Option<ObserverId>,
        flag: CancelFlag,
        tracker: Weak<ChangeTracker>,
        region: Arc<Mutex<Region>>,
    ) -> Self {
        Self {
            id,
            flag,
            tracker,
            region,
        }
    }

    /// Cancels the observation. Idempotent, callable from any thread,
    /// including from inside the observation's own callbacks.
    pub fn cancel(&self) {
        if !self.flag.cancel() {
            return;
        }
        if let (Some(id), Some(tracker)) = (self.id, self.tracker.upgrade()) {
            tracker.remove(id);
        }
        debug!(observer = ?self.id, "observation cancelled");
    }

    /// Returns true once the observation is cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.flag.is_cancelled()
    }

    /// Returns the region the observation currently tracks.
    ///
    /// Observations that track what they fetch report the base tables they
    /// read: an observation of a view reports the view's table.
    pub fn observed_region(&self) -> Region {
        self.region.lock().clone()
    }
}

impl Drop for DatabaseCancellable {
    fn drop(&mut self) {
        self.cancel();
    }
}
