//! Per-region executor contract.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sequence::Sequence;

/// Error type phase callbacks surface across the trait seam.
///
/// Boxed so domain managers can return their own error types; the executor
/// logs it with region identity and phase name.
pub type ManagerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Sentinel returned by [`AsyncManager::first_dynamic_update_time`] when no
/// dynamic updates are pending.
pub const NO_DYNAMIC_UPDATES: u64 = u64::MAX;

/// Identifier of a region (one [`AsyncManager`] owner).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionId(pub u32);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region-{}", self.0)
    }
}

/// The ordered per-tick callbacks each region worker implements.
///
/// The scheduler drives every registered manager through the phases in a
/// fixed order, waiting for all regions to finish a phase before any region
/// sees the next one. Phases 2-4 are invoked once for [`Sequence::Local`]
/// and once per neighbor group the region belongs to, and may repeat within
/// a tick while updates cascade.
///
/// Phase errors do not abort sibling regions: the executor logs the error
/// and skips this manager's remaining phases until the next tick's
/// [`start_tick`](Self::start_tick).
pub trait AsyncManager: Send + 'static {
    /// This manager's own sequence group, fixed for its lifetime.
    fn sequence(&self) -> Sequence;

    /// How many start-tick sub-stages this manager needs.
    fn max_stage(&self) -> u32 {
        1
    }

    /// Begins a tick. `stage` splits the tick start into sub-stages when
    /// some work must happen strictly before other work across *all*
    /// managers, not just within one.
    fn start_tick(&mut self, stage: u32, delta: Duration) -> Result<(), ManagerError>;

    /// Runs block physics for one sequence group. Returns the number of
    /// updates performed so the scheduler can keep cascading until the
    /// world is quiescent.
    fn run_physics(&mut self, sequence: Sequence) -> Result<u64, ManagerError> {
        let _ = sequence;
        Ok(0)
    }

    /// Processes dynamic updates scheduled at or before `threshold` (millis
    /// on the scheduler's clock) for one sequence group.
    fn run_dynamic_updates(
        &mut self,
        threshold: u64,
        sequence: Sequence,
    ) -> Result<u64, ManagerError> {
        let _ = (threshold, sequence);
        Ok(0)
    }

    /// Runs lighting resolution for one sequence group.
    fn run_lighting(&mut self, sequence: Sequence) -> Result<u64, ManagerError> {
        let _ = sequence;
        Ok(0)
    }

    /// Last chance to mutate live state this tick.
    fn finalize_tick(&mut self) -> Result<(), ManagerError> {
        Ok(())
    }

    /// Monitor-only phase: must not mutate live state (`&self` enforces
    /// it). Other threads may concurrently read the *previous* snapshot.
    fn pre_snapshot(&self) -> Result<(), ManagerError> {
        Ok(())
    }

    /// Publishes live state as the new snapshot. Must be indivisible with
    /// respect to readers: they see the whole old snapshot or the whole new
    /// one.
    fn copy_snapshot(&mut self) -> Result<(), ManagerError>;

    /// Scheduled time of the earliest pending dynamic update, or
    /// [`NO_DYNAMIC_UPDATES`]. Lets the scheduler skip the dynamic-update
    /// phase entirely when nothing is due.
    fn first_dynamic_update_time(&self) -> u64 {
        NO_DYNAMIC_UPDATES
    }

    /// Called once when this region's executor is killed or halted. No
    /// further phases run afterwards.
    fn halt(&mut self) {}
}
