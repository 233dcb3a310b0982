//! Barrier-phase tick driver.
//!
//! Dispatches management tasks to every registered region executor in the
//! globally agreed phase order, waiting for all regions to finish a phase
//! (every sequence group) before any region sees the next one. Within a
//! phase and group, regions run in full parallel.
//!
//! The exclusive snapshot lock is held across the live phases of the tick;
//! plugin readers holding it too long are reported through the owner
//! bookkeeping while the scheduler retries with an escalating timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use quarry_sync::SnapshotLock;

use crate::executor::{ExecutorError, ExecutorState, RegionExecutor, TaskOutcome};
use crate::manager::NO_DYNAMIC_UPDATES;
use crate::sequence::Sequence;
use crate::stage::{StageMonitor, TickStage};
use crate::task::ManagementTask;

const DEFAULT_PULSE_EVERY_MILLIS: u64 = 50;
const DEFAULT_UPDATE_THRESHOLD: u64 = 100_000;
const DEFAULT_WRITE_LOCK_DELAY_MILLIS: u64 = 500;
const DEFAULT_LOCK_STALL_THRESHOLD_MILLIS: u64 = 50;

/// Tunables for the tick loop.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Nominal tick period; dynamic-update thresholds are derived from it.
    pub pulse_every_millis: u64,
    /// Cap on cascading physics/dynamic updates within one tick.
    pub update_threshold: u64,
    /// Initial snapshot write-lock timeout; escalates 1.5x per failure.
    pub write_lock_delay_millis: u64,
    /// Hold time past which a read-lock owner is reported as stalling.
    pub lock_stall_threshold_millis: u64,
    /// Run the physics phase.
    pub run_physics: bool,
    /// Run the dynamic-updates phase.
    pub run_dynamic_updates: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pulse_every_millis: DEFAULT_PULSE_EVERY_MILLIS,
            update_threshold: DEFAULT_UPDATE_THRESHOLD,
            write_lock_delay_millis: DEFAULT_WRITE_LOCK_DELAY_MILLIS,
            lock_stall_threshold_millis: DEFAULT_LOCK_STALL_THRESHOLD_MILLIS,
            run_physics: true,
            run_dynamic_updates: true,
        }
    }
}

/// What one tick did, for callers that watch scheduler health.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub tick: u64,
    /// Physics, dynamic, and lighting updates performed across all regions.
    pub updates: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub skipped_tasks: u64,
}

#[derive(Debug, Default)]
struct RoundOutcome {
    updates: u64,
    completed: u64,
    failed: u64,
    skipped: u64,
}

impl RoundOutcome {
    fn merge(&mut self, other: &Self) {
        self.updates += other.updates;
        self.completed += other.completed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

impl TickSummary {
    fn absorb(&mut self, outcome: &RoundOutcome) {
        self.updates += outcome.updates;
        self.completed_tasks += outcome.completed;
        self.failed_tasks += outcome.failed;
        self.skipped_tasks += outcome.skipped;
    }
}

/// Drives all registered regions through the tick phases in lock-step.
#[derive(Debug)]
pub struct TickScheduler {
    executors: Vec<RegionExecutor>,
    snapshot_lock: Arc<SnapshotLock>,
    stage: Arc<StageMonitor>,
    config: SchedulerConfig,
    tick: u64,
}

impl TickScheduler {
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_snapshot_lock(config, Arc::new(SnapshotLock::new()))
    }

    /// Builds a scheduler sharing `snapshot_lock` with plugin code that
    /// takes read locks on it.
    #[must_use]
    pub fn with_snapshot_lock(config: SchedulerConfig, snapshot_lock: Arc<SnapshotLock>) -> Self {
        Self {
            executors: Vec::new(),
            snapshot_lock,
            stage: Arc::new(StageMonitor::new()),
            config,
            tick: 0,
        }
    }

    /// The lock plugin readers share with this scheduler.
    #[must_use]
    pub fn snapshot_lock(&self) -> &Arc<SnapshotLock> {
        &self.snapshot_lock
    }

    /// The stage record for callers with stage restrictions.
    #[must_use]
    pub fn stage(&self) -> &Arc<StageMonitor> {
        &self.stage
    }

    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    #[must_use]
    pub fn region_count(&self) -> usize {
        self.executors.len()
    }

    /// Registers a region and starts its worker thread.
    pub fn add_region(&mut self, mut executor: RegionExecutor) -> Result<(), ExecutorError> {
        executor.start()?;
        debug!(
            region = executor.name(),
            sequence = executor.sequence().index(),
            "region registered"
        );
        self.executors.push(executor);
        Ok(())
    }

    /// Runs one full tick across all regions.
    ///
    /// Phase failures never abort the tick; they are logged by the faulting
    /// region's worker and tallied in the returned summary while sibling
    /// regions run to completion.
    pub fn tick(&mut self, delta: Duration) -> TickSummary {
        let mut summary = TickSummary {
            tick: self.tick,
            ..TickSummary::default()
        };
        self.stage.set(TickStage::TICK_START);

        let max_stage = self
            .executors
            .iter()
            .filter(|executor| executor.state() == ExecutorState::Started)
            .map(RegionExecutor::max_stage)
            .max()
            .unwrap_or(1);
        for stage in 0..max_stage {
            self.stage.set(if stage == 0 {
                TickStage::STAGE1
            } else {
                TickStage::STAGE2P
            });
            let outcome = self.dispatch_round(ManagementTask::StartTick {
                stage,
                delta_millis: delta.as_millis() as u64,
            });
            summary.absorb(&outcome);
        }

        self.lock_snapshot_write();

        let mut total_updates = 0u64;
        let mut dynamic_updates = 1u64;
        let mut physics_updates = 1u64;
        while dynamic_updates + physics_updates > 0 && total_updates < self.config.update_threshold
        {
            dynamic_updates = if self.config.run_dynamic_updates {
                self.do_dynamic_updates(&mut summary)
            } else {
                0
            };
            total_updates += dynamic_updates;

            physics_updates = if self.config.run_physics {
                self.do_physics(&mut summary)
            } else {
                0
            };
            total_updates += physics_updates;
        }
        if total_updates >= self.config.update_threshold {
            warn!(
                updates = total_updates,
                threshold = self.config.update_threshold,
                "updates per tick exceeded the cascade threshold"
            );
        }

        let lighting = self.run_sequenced(
            |sequence| ManagementTask::Lighting { sequence },
            TickStage::LIGHTING,
            TickStage::LIGHTING,
        );
        summary.absorb(&lighting);

        self.stage.set(TickStage::FINALIZE);
        let outcome = self.dispatch_round(ManagementTask::Finalize);
        summary.absorb(&outcome);

        self.stage.set(TickStage::PRE_SNAPSHOT);
        let outcome = self.dispatch_round(ManagementTask::PreSnapshot);
        summary.absorb(&outcome);

        self.stage.set(TickStage::SNAPSHOT);
        let outcome = self.dispatch_round(ManagementTask::CopySnapshot);
        summary.absorb(&outcome);

        self.snapshot_lock.write_unlock();
        self.stage.set(TickStage::TICK_START);
        self.tick += 1;
        summary
    }

    /// Kills every region, waits for the reports, and joins the workers.
    pub fn shutdown(&mut self) {
        let (reply, reports) = crossbeam_channel::unbounded();
        for executor in &self.executors {
            if executor.state() != ExecutorState::Started {
                continue;
            }
            if let Err(err) = executor.submit(ManagementTask::Kill, &reply) {
                error!(region = executor.name(), error = %err, "failed to dispatch kill");
            }
        }
        drop(reply);
        for _report in reports.iter() {}
        for executor in &mut self.executors {
            executor.join();
        }
        info!(regions = self.executors.len(), "tick scheduler shut down");
    }

    /// Physics cascade: keep re-running the phase while regions report new
    /// updates, up to the per-tick threshold.
    fn do_physics(&self, summary: &mut TickSummary) -> u64 {
        let mut total = 0u64;
        loop {
            let outcome = self.run_sequenced(
                |sequence| ManagementTask::Physics { sequence },
                TickStage::PHYSICS,
                TickStage::GLOBAL_PHYSICS,
            );
            let updates = outcome.updates;
            summary.absorb(&outcome);
            total += updates;
            if updates == 0 || total >= self.config.update_threshold {
                return total;
            }
        }
    }

    /// Dynamic-update cascade. Skipped entirely when no region has a
    /// pending update; otherwise the threshold covers everything due within
    /// the current pulse.
    fn do_dynamic_updates(&self, summary: &mut TickSummary) -> u64 {
        self.stage.set(TickStage::GLOBAL_DYNAMIC_UPDATES);
        let earliest = self
            .executors
            .iter()
            .filter(|executor| executor.state() == ExecutorState::Started)
            .map(RegionExecutor::first_dynamic_update_time)
            .min()
            .unwrap_or(NO_DYNAMIC_UPDATES);
        if earliest == NO_DYNAMIC_UPDATES {
            return 0;
        }
        let threshold = earliest.saturating_add(self.config.pulse_every_millis.saturating_sub(1));

        let mut total = 0u64;
        loop {
            let outcome = self.run_sequenced(
                |sequence| ManagementTask::DynamicUpdates {
                    threshold,
                    sequence,
                },
                TickStage::DYNAMIC_UPDATES,
                TickStage::GLOBAL_DYNAMIC_UPDATES,
            );
            let updates = outcome.updates;
            summary.absorb(&outcome);
            total += updates;
            if updates == 0 || total >= self.config.update_threshold {
                return total;
            }
        }
    }

    /// Runs one task per sequence group, local first, waiting for every
    /// region in a group before starting the next group.
    fn run_sequenced(
        &self,
        make_task: impl Fn(Sequence) -> ManagementTask,
        local_stage: TickStage,
        global_stage: TickStage,
    ) -> RoundOutcome {
        let mut total = RoundOutcome::default();
        for group in Sequence::iter_all() {
            self.stage.set(if group == Sequence::Local {
                local_stage
            } else {
                global_stage
            });
            total.merge(&self.dispatch_round(make_task(group)));
        }
        total
    }

    /// Dispatches one task to every live, matching region and waits for all
    /// of their reports: the barrier that keeps phases in lock-step.
    fn dispatch_round(&self, task: ManagementTask) -> RoundOutcome {
        let (reply, reports) = crossbeam_channel::unbounded();
        let mut dispatched = 0u64;
        for executor in &self.executors {
            if executor.state() != ExecutorState::Started {
                continue;
            }
            match executor.submit(task, &reply) {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(err) => {
                    error!(region = executor.name(), error = %err, "failed to dispatch task");
                }
            }
        }
        drop(reply);

        let mut outcome = RoundOutcome::default();
        for report in reports.iter() {
            match report.outcome {
                TaskOutcome::Completed { updates } => {
                    outcome.completed += 1;
                    outcome.updates += updates;
                }
                TaskOutcome::Skipped => outcome.skipped += 1,
                TaskOutcome::Failed(_) => outcome.failed += 1,
            }
        }
        let reported = outcome.completed + outcome.failed + outcome.skipped;
        if reported < dispatched {
            warn!(
                task = task.phase_name(),
                missing = dispatched - reported,
                "region worker died before reporting"
            );
        }
        outcome
    }

    /// Acquires the exclusive snapshot lock, escalating the timeout and
    /// reporting stalling owners on every failed attempt.
    fn lock_snapshot_write(&self) {
        let mut delay = Duration::from_millis(self.config.write_lock_delay_millis.max(1));
        let start = Instant::now();
        while !self.snapshot_lock.write_lock(delay) {
            delay = delay.mul_f64(1.5);
            warn!(
                stall_millis = start.elapsed().as_millis() as u64,
                "unable to acquire snapshot write lock"
            );
            for owner in self
                .snapshot_lock
                .locking_owners(self.config.lock_stall_threshold_millis)
            {
                warn!(
                    owner = %owner,
                    threshold_millis = self.config.lock_stall_threshold_millis,
                    "owner has held the snapshot lock past the stall threshold"
                );
            }
        }
    }
}
