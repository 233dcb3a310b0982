//! Live/snapshot value pairs.
//!
//! Each region mutates its own live state during a tick while other threads
//! read the previously published snapshot. The copy-snapshot phase is the
//! only point where live state becomes visible, and the publish is atomic
//! with respect to readers: they observe the whole old value or the whole
//! new one, never a mix.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

/// A value that can publish its live state as a new snapshot.
pub trait Snapshotable: Send + Sync {
    fn copy_snapshot(&self);
}

/// A single value with a live side and a published snapshot side.
pub struct SnapshotValue<T> {
    live: Mutex<T>,
    snapshot: RwLock<T>,
}

impl<T: Clone> SnapshotValue<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            live: Mutex::new(value.clone()),
            snapshot: RwLock::new(value),
        }
    }

    /// Replaces the live value. Only the owning region thread should call
    /// this during live phases.
    pub fn set(&self, value: T) {
        *self.live.lock() = value;
    }

    /// Reads the live value. Owner-side only; other threads must use
    /// [`get`](Self::get).
    #[must_use]
    pub fn live(&self) -> T {
        self.live.lock().clone()
    }

    /// Reads the published snapshot. Safe from any thread.
    #[must_use]
    pub fn get(&self) -> T {
        self.snapshot.read().clone()
    }
}

impl<T: Clone + Send + Sync> Snapshotable for SnapshotValue<T> {
    fn copy_snapshot(&self) {
        let live = self.live.lock().clone();
        *self.snapshot.write() = live;
    }
}

impl<T: Clone + fmt::Debug> fmt::Debug for SnapshotValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotValue")
            .field("snapshot", &*self.snapshot.read())
            .finish()
    }
}

/// Registry of snapshotable values copied together in one call.
///
/// A region registers every snapshotable it owns and invokes
/// [`copy_all_snapshots`](Self::copy_all_snapshots) from its copy-snapshot
/// phase.
#[derive(Default)]
pub struct SnapshotManager {
    values: Mutex<Vec<Arc<dyn Snapshotable>>>,
}

impl SnapshotManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, value: Arc<dyn Snapshotable>) {
        self.values.lock().push(value);
    }

    /// Publishes every registered value's live state.
    pub fn copy_all_snapshots(&self) {
        for value in self.values.lock().iter() {
            value.copy_snapshot();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

impl fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("values", &self.values.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_lags_live_until_copied() {
        let value = SnapshotValue::new(0u64);

        value.set(42);
        assert_eq!(value.live(), 42);
        assert_eq!(value.get(), 0);

        value.copy_snapshot();
        assert_eq!(value.get(), 42);
    }

    #[test]
    fn test_manager_copies_all_registered_values() {
        let manager = SnapshotManager::new();
        let a = Arc::new(SnapshotValue::new(1u32));
        let b = Arc::new(SnapshotValue::new(String::from("old")));
        manager.register(a.clone());
        manager.register(b.clone());
        assert_eq!(manager.len(), 2);

        a.set(2);
        b.set(String::from("new"));
        manager.copy_all_snapshots();

        assert_eq!(a.get(), 2);
        assert_eq!(b.get(), "new");
    }
}
