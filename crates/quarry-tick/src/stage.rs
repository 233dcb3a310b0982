//! Tick stage tracking.
//!
//! The scheduler records which stage of the tick is currently executing.
//! Code with stage restrictions (e.g. live-state mutation is only legal up
//! to finalize) asserts against the monitor instead of trusting its caller.

use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Stages of a tick, as a mask so callers can allow several at once.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TickStage: u32 {
        /// Between ticks; snapshot state is stable.
        const TICK_START = 1 << 0;
        /// First start-tick sub-stage.
        const STAGE1 = 1 << 1;
        /// Second and later start-tick sub-stages.
        const STAGE2P = 1 << 2;
        /// Local physics group.
        const PHYSICS = 1 << 3;
        /// Neighbor physics groups.
        const GLOBAL_PHYSICS = 1 << 4;
        /// Local dynamic-update group.
        const DYNAMIC_UPDATES = 1 << 5;
        /// Neighbor dynamic-update groups.
        const GLOBAL_DYNAMIC_UPDATES = 1 << 6;
        /// Lighting resolution.
        const LIGHTING = 1 << 7;
        /// Last chance to mutate live state.
        const FINALIZE = 1 << 8;
        /// Monitor only; concurrent readers may observe the old snapshot.
        const PRE_SNAPSHOT = 1 << 9;
        /// Live state is being published as the new snapshot.
        const SNAPSHOT = 1 << 10;
    }
}

/// Raised when code runs in a tick stage it is not allowed in.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("disallowed tick stage: current is {current:?}, allowed are {allowed:?}")]
pub struct TickSequenceError {
    pub current: TickStage,
    pub allowed: TickStage,
}

/// Shared record of the scheduler's current tick stage.
///
/// Explicitly constructed and handed out by the owning scheduler; one
/// instance per scheduler, never process-global.
#[derive(Debug)]
pub struct StageMonitor {
    current: AtomicU32,
}

impl StageMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: AtomicU32::new(TickStage::TICK_START.bits()),
        }
    }

    pub fn set(&self, stage: TickStage) {
        self.current.store(stage.bits(), Ordering::Release);
    }

    #[must_use]
    pub fn current(&self) -> TickStage {
        TickStage::from_bits_truncate(self.current.load(Ordering::Acquire))
    }

    /// Errors unless the current stage is within `allowed`.
    pub fn check(&self, allowed: TickStage) -> Result<(), TickSequenceError> {
        let current = self.current();
        if allowed.contains(current) {
            Ok(())
        } else {
            Err(TickSequenceError { current, allowed })
        }
    }
}

impl Default for StageMonitor {
    fn default() -> Self {
        Self::new()
    }
}
