//! Shared fixtures for the scenarios under `tests/`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use quarry_sync::{SetQueue, SnapshotManager, SnapshotValue, Validatable};
use quarry_tick::{AsyncManager, ManagerError, NO_DYNAMIC_UPDATES, Sequence};

/// Installs a log subscriber once per process; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type PreSnapshotHook = Box<dyn Fn(u64) + Send + Sync>;

/// Dirty-markable block fixture for a region's set queue.
pub struct DirtyBlock {
    pub id: u32,
    removed: AtomicBool,
}

impl DirtyBlock {
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self {
            id,
            removed: AtomicBool::new(false),
        }
    }

    /// Marks the block removed so the queue discards it instead of
    /// delivering it.
    pub fn remove(&self) {
        self.removed.store(true, Ordering::Release);
    }
}

impl Validatable for DirtyBlock {
    fn is_valid(&self) -> bool {
        !self.removed.load(Ordering::Acquire)
    }
}

/// Manager that counts ticks in live state and publishes the count through a
/// [`SnapshotValue`], exposing the snapshot side for assertion from other
/// threads.
pub struct CounterManager {
    sequence: Sequence,
    ticks: u64,
    value: Arc<SnapshotValue<u64>>,
    snapshots: SnapshotManager,
    dirty: Arc<SetQueue<DirtyBlock>>,
    next_dynamic_update: Option<u64>,
    fail_physics_on_tick: Option<u64>,
    pre_snapshot_hook: Option<PreSnapshotHook>,
}

impl CounterManager {
    #[must_use]
    pub fn new(sequence: Sequence) -> Self {
        let value = Arc::new(SnapshotValue::new(0u64));
        let snapshots = SnapshotManager::new();
        snapshots.register(Arc::clone(&value) as Arc<dyn quarry_sync::Snapshotable>);
        Self {
            sequence,
            ticks: 0,
            value,
            snapshots,
            dirty: SetQueue::new(64),
            next_dynamic_update: None,
            fail_physics_on_tick: None,
            pre_snapshot_hook: None,
        }
    }

    /// The region's dirty-block queue. Producers mark blocks dirty through
    /// it; the physics phase drains it.
    #[must_use]
    pub fn dirty_queue(&self) -> Arc<SetQueue<DirtyBlock>> {
        Arc::clone(&self.dirty)
    }

    /// The published tick count, readable from any thread.
    #[must_use]
    pub fn value(&self) -> Arc<SnapshotValue<u64>> {
        Arc::clone(&self.value)
    }

    /// Schedules one dynamic update due at `due_millis`.
    #[must_use]
    pub fn with_dynamic_update_at(mut self, due_millis: u64) -> Self {
        self.next_dynamic_update = Some(due_millis);
        self
    }

    /// Makes the physics phase fail during tick `tick` (1-based).
    #[must_use]
    pub fn with_physics_failure_on_tick(mut self, tick: u64) -> Self {
        self.fail_physics_on_tick = Some(tick);
        self
    }

    /// Runs `hook` during the pre-snapshot phase with the currently
    /// published snapshot value.
    #[must_use]
    pub fn with_pre_snapshot_hook(mut self, hook: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.pre_snapshot_hook = Some(Box::new(hook));
        self
    }
}

impl AsyncManager for CounterManager {
    fn sequence(&self) -> Sequence {
        self.sequence
    }

    fn start_tick(&mut self, _stage: u32, _delta: Duration) -> Result<(), ManagerError> {
        self.ticks += 1;
        Ok(())
    }

    fn run_physics(&mut self, _sequence: Sequence) -> Result<u64, ManagerError> {
        if self.fail_physics_on_tick == Some(self.ticks) {
            return Err(format!("injected physics failure on tick {}", self.ticks).into());
        }
        let mut updates = 0;
        while self.dirty.poll().is_some() {
            updates += 1;
        }
        Ok(updates)
    }

    fn run_dynamic_updates(
        &mut self,
        threshold: u64,
        _sequence: Sequence,
    ) -> Result<u64, ManagerError> {
        match self.next_dynamic_update {
            Some(due) if due <= threshold => {
                self.next_dynamic_update = None;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn finalize_tick(&mut self) -> Result<(), ManagerError> {
        self.value.set(self.ticks);
        Ok(())
    }

    fn pre_snapshot(&self) -> Result<(), ManagerError> {
        if let Some(hook) = &self.pre_snapshot_hook {
            hook(self.value.get());
        }
        Ok(())
    }

    fn copy_snapshot(&mut self) -> Result<(), ManagerError> {
        self.snapshots.copy_all_snapshots();
        Ok(())
    }

    fn first_dynamic_update_time(&self) -> u64 {
        self.next_dynamic_update.unwrap_or(NO_DYNAMIC_UPDATES)
    }
}
