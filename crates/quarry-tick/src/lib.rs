//! Quarry Tick
//!
//! Barrier-phase tick execution across independently threaded world regions.
//!
//! # Tick Execution Model
//!
//! ```text
//! Tick N:
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Start tick (sub-stage 0..max_stage, all regions)            │
//! │  ── snapshot write lock acquired ──                          │
//! │  Dynamic updates / physics cascade (per sequence group)      │
//! │  Lighting (per sequence group)                               │
//! │  Finalize (all regions)             last live mutation       │
//! │  Pre-snapshot (all regions)         monitor only             │
//! │  Copy snapshot (all regions)        live -> snapshot publish │
//! │  ── snapshot write lock released ──                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each region owns one [`AsyncManager`] driven by a [`RegionExecutor`]
//! worker thread. The [`TickScheduler`] dispatches [`ManagementTask`]
//! commands in globally agreed phase order and waits for every region to
//! finish a phase (all [`Sequence`] groups) before any region sees the next
//! one. A failing region is isolated: its remaining phases for the tick are
//! skipped while its siblings run to completion.

mod executor;
mod manager;
mod scheduler;
mod sequence;
mod stage;
mod task;

pub use executor::{ExecutorError, ExecutorState, RegionExecutor, TaskOutcome, TaskReport};
pub use manager::{AsyncManager, ManagerError, NO_DYNAMIC_UPDATES, RegionId};
pub use scheduler::{SchedulerConfig, TickScheduler, TickSummary};
pub use sequence::{Direction, InvalidDirection, Sequence};
pub use stage::{StageMonitor, TickSequenceError, TickStage};
pub use task::ManagementTask;
