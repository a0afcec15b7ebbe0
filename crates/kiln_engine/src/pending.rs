//! Change notifications shared between the engine and its callers.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kiln_common::ModuleId;
use parking_lot::Mutex;

/// Phase of the engine's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Waiting for the next change batch.
    Idle,
    /// Reading changed sources.
    Scanning,
    /// Updating the graph and cache for changed and deleted modules.
    Invalidating,
    /// Running transforms.
    Scheduling,
    /// The generation finished without module errors.
    Done,
    /// The generation finished with module errors, or aborted.
    Failed,
}

#[derive(Debug)]
struct PendingChanges {
    paths: BTreeSet<ModuleId>,
    stamps: HashMap<ModuleId, u64>,
    counter: u64,
    last_notified: Option<Instant>,
}

#[derive(Debug)]
struct Shared {
    pending: Mutex<PendingChanges>,
    state: Mutex<EngineState>,
}

/// A cloneable handle for feeding change notifications to an engine.
///
/// Notifications may arrive from any thread at any time. Those that arrive
/// while a generation runs are held and coalesced into the next one.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(PendingChanges {
                    paths: BTreeSet::new(),
                    stamps: HashMap::new(),
                    counter: 0,
                    last_notified: None,
                }),
                state: Mutex::new(EngineState::Idle),
            }),
        }
    }

    /// Reports that the source at `path` changed, appeared, or was deleted.
    pub fn notify(&self, path: impl AsRef<Path>) {
        self.notify_all([path]);
    }

    /// Reports a batch of changed paths.
    pub fn notify_all<P: AsRef<Path>>(&self, paths: impl IntoIterator<Item = P>) {
        let mut pending = self.shared.pending.lock();
        for path in paths {
            let id = ModuleId::from_path(path.as_ref());
            pending.counter += 1;
            let stamp = pending.counter;
            pending.stamps.insert(id.clone(), stamp);
            pending.paths.insert(id);
        }
        pending.last_notified = Some(Instant::now());
    }

    /// Number of paths waiting for the next generation.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().paths.len()
    }

    /// Current phase of the engine.
    pub fn state(&self) -> EngineState {
        *self.shared.state.lock()
    }

    pub(crate) fn set_state(&self, state: EngineState) {
        *self.shared.state.lock() = state;
    }

    /// Notification stamp of `id`, or zero if it was never notified.
    ///
    /// Stamps only grow, so a result computed under an older stamp is
    /// outdated.
    pub(crate) fn stamp(&self, id: &ModuleId) -> u64 {
        self.shared.pending.lock().stamps.get(id).copied().unwrap_or(0)
    }

    /// Time left until `window` has passed since the last notification.
    pub(crate) fn quiet_remaining(&self, window: Duration) -> Duration {
        match self.shared.pending.lock().last_notified {
            Some(at) => window.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Removes and returns every pending path.
    pub(crate) fn drain(&self) -> BTreeSet<ModuleId> {
        std::mem::take(&mut self.shared.pending.lock().paths)
    }

    /// Drops the notification stamp of a module that left the graph.
    pub(crate) fn forget(&self, id: &ModuleId) {
        self.shared.pending.lock().stamps.remove(id);
    }

    /// Number of paths with a notification stamp.
    pub fn tracked_len(&self) -> usize {
        self.shared.pending.lock().stamps.len()
    }

    /// Puts a path back for the next generation without bumping its stamp.
    pub(crate) fn requeue(&self, id: ModuleId) {
        self.shared.pending.lock().paths.insert(id);
    }
}
