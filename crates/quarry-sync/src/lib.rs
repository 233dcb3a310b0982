//! Quarry Sync
//!
//! Concurrency primitives shared by the tick machinery:
//!
//! - [`SetQueue`] / [`SetQueueElement`]: a bounded concurrent queue where a
//!   logical element is present at most once, no matter how many producers
//!   mark it dirty concurrently.
//! - [`SnapshotLock`]: the global read/write lock separating ordinary ticking
//!   readers from exclusive barrier writers, with per-owner hold bookkeeping
//!   for stall diagnostics.
//! - [`SnapshotValue`] / [`SnapshotManager`]: live/snapshot value pairs that
//!   publish a consistent copy of region state for cross-thread readers.

mod clock;
mod set_queue;
mod snapshot;
mod snapshot_lock;

pub use clock::{Clock, ManualClock, SystemClock};
pub use set_queue::{SetQueue, SetQueueElement, SetQueueError, Validatable};
pub use snapshot::{SnapshotManager, SnapshotValue, Snapshotable};
pub use snapshot_lock::{SnapshotLock, SnapshotReadGuard};
