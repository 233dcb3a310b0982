//! Global snapshot read/write lock with stall diagnostics.
//!
//! Ordinary ticking threads and plugins take shared read locks while they
//! consume published snapshot state; the scheduler takes the exclusive write
//! lock as a global barrier (full-world saves and the copy-snapshot fence).
//!
//! Every read acquisition is attributed to an owner. Per-owner bookkeeping
//! records how many locks that owner currently holds and when the oldest of
//! them was taken, mutated with compare-and-swap retry loops so diagnostics
//! never block the lock's fast path. [`SnapshotLock::locking_owners`]
//! reports owners that have been holding the lock past a threshold, which is
//! how a stalled write barrier is traced back to the plugin causing it.
#![allow(unsafe_code)]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::lock_api::{RawRwLock as RawRwLockOps, RawRwLockTimed};
use parking_lot::{RawRwLock, RwLock};
use rustc_hash::FxHashMap;

use crate::clock::{Clock, SystemClock};

/// Per-owner lock-hold record.
///
/// `oldest_lock` is only meaningful while `locks > 0`; it is restamped on
/// every 0 -> 1 transition.
#[derive(Debug, Default)]
struct LockInfo {
    locks: AtomicU32,
    oldest_lock: AtomicU64,
}

/// Global reentrant read/write lock guarding cross-region snapshot access.
///
/// Many concurrent readers (ticking regions, plugins), one exclusive writer
/// (the scheduler's global barrier). The owner-bookkeeping layer is
/// decoupled from the lock primitive: a [`Clock`] can be injected so tests
/// control the stall timestamps.
pub struct SnapshotLock<C = SystemClock> {
    raw: RawRwLock,
    writer_held: AtomicBool,
    owners: RwLock<FxHashMap<Arc<str>, Arc<LockInfo>>>,
    clock: C,
}

impl SnapshotLock {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock::new())
    }
}

impl Default for SnapshotLock {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> SnapshotLock<C> {
    #[must_use]
    pub fn with_clock(clock: C) -> Self {
        Self {
            raw: RawRwLock::INIT,
            writer_held: AtomicBool::new(false),
            owners: RwLock::new(FxHashMap::default()),
            clock,
        }
    }

    /// Acquires a shared lock on behalf of `owner`, blocking while the
    /// writer holds the lock.
    pub fn read_lock(&self, owner: &str) {
        self.raw.lock_shared();
        self.add_lock(owner);
    }

    /// Non-blocking shared acquisition. Bookkeeping is updated only on
    /// success.
    pub fn read_try_lock(&self, owner: &str) -> bool {
        if self.raw.try_lock_shared() {
            self.add_lock(owner);
            true
        } else {
            false
        }
    }

    /// Releases a shared lock previously taken by `owner`.
    ///
    /// # Panics
    ///
    /// Panics if `owner` has no recorded open lock. That is a programming
    /// error, and the bookkeeping check runs before the lock itself is
    /// touched so misuse cannot unbalance it.
    pub fn read_unlock(&self, owner: &str) {
        self.remove_lock(owner);
        unsafe {
            self.raw.unlock_shared();
        }
    }

    /// Shared acquisition that releases on drop.
    #[must_use]
    pub fn read_guard(&self, owner: &str) -> SnapshotReadGuard<'_, C> {
        self.read_lock(owner);
        SnapshotReadGuard {
            lock: self,
            owner: Arc::from(owner),
        }
    }

    /// Attempts to acquire the exclusive lock within `timeout`.
    ///
    /// The writer is the scheduler itself, so no per-owner bookkeeping is
    /// recorded.
    #[must_use]
    pub fn write_lock(&self, timeout: Duration) -> bool {
        if self.raw.try_lock_exclusive_for(timeout) {
            self.writer_held.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Releases the exclusive lock.
    ///
    /// # Panics
    ///
    /// Panics if the exclusive lock is not currently held.
    pub fn write_unlock(&self) {
        if self
            .writer_held
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            panic!("snapshot write lock released while not held");
        }
        unsafe {
            self.raw.unlock_exclusive();
        }
    }

    /// Non-blocking probe for an active writer.
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        if self.raw.try_lock_shared() {
            unsafe {
                self.raw.unlock_shared();
            }
            false
        } else {
            true
        }
    }

    /// Owners currently holding at least one lock whose oldest acquisition
    /// is older than `threshold_millis`.
    #[must_use]
    pub fn locking_owners(&self, threshold_millis: u64) -> Vec<Arc<str>> {
        let now = self.clock.now_millis();
        self.owners
            .read()
            .iter()
            .filter(|(_, info)| {
                info.locks.load(Ordering::Acquire) > 0
                    && now.saturating_sub(info.oldest_lock.load(Ordering::Acquire))
                        > threshold_millis
            })
            .map(|(owner, _)| Arc::clone(owner))
            .collect()
    }

    /// Number of locks `owner` currently holds open.
    #[must_use]
    pub fn open_locks(&self, owner: &str) -> u32 {
        self.owners
            .read()
            .get(owner)
            .map_or(0, |info| info.locks.load(Ordering::Acquire))
    }

    fn owner_info(&self, owner: &str) -> Arc<LockInfo> {
        if let Some(info) = self.owners.read().get(owner) {
            return Arc::clone(info);
        }
        let mut owners = self.owners.write();
        Arc::clone(owners.entry(Arc::from(owner)).or_default())
    }

    fn add_lock(&self, owner: &str) {
        let info = self.owner_info(owner);
        let mut locks = info.locks.load(Ordering::Acquire);
        loop {
            match info.locks.compare_exchange(
                locks,
                locks + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                // Won the 0 -> 1 transition: restamp the hold start, with
                // the time read after the win. Only the winner ever writes
                // the stamp, so a losing or preempted thread can never
                // clobber the real holder's timestamp.
                Ok(0) => {
                    info.oldest_lock
                        .store(self.clock.now_millis(), Ordering::Release);
                    break;
                }
                Ok(_) => break,
                Err(actual) => locks = actual,
            }
        }
    }

    fn remove_lock(&self, owner: &str) {
        let info = self.owners.read().get(owner).map(Arc::clone);
        let decremented = info.as_ref().is_some_and(|info| {
            info.locks
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |locks| {
                    locks.checked_sub(1)
                })
                .is_ok()
        });
        assert!(
            decremented,
            "attempted to remove a lock for owner {owner:?} with no previously added lock"
        );
    }
}

impl<C> fmt::Debug for SnapshotLock<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotLock")
            .field("write_held", &self.writer_held.load(Ordering::Acquire))
            .field("owners", &self.owners.read().len())
            .finish()
    }
}

/// RAII wrapper over [`SnapshotLock::read_lock`] /
/// [`SnapshotLock::read_unlock`].
pub struct SnapshotReadGuard<'a, C: Clock> {
    lock: &'a SnapshotLock<C>,
    owner: Arc<str>,
}

impl<C: Clock> Drop for SnapshotReadGuard<'_, C> {
    fn drop(&mut self) {
        self.lock.read_unlock(&self.owner);
    }
}

impl<C: Clock> fmt::Debug for SnapshotReadGuard<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotReadGuard")
            .field("owner", &self.owner)
            .finish()
    }
}
