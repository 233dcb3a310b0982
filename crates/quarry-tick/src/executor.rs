//! Per-region worker threads.
//!
//! A [`RegionExecutor`] owns one [`AsyncManager`] on a dedicated thread and
//! consumes [`ManagementTask`]s from a channel. Each executed task reports
//! back to its dispatcher, which is how the scheduler waits for a whole
//! phase to finish before issuing the next one.
//!
//! Fault isolation lives here: a phase error is logged with region identity
//! and phase name, and the region skips its remaining phases until the next
//! tick's start. Sibling regions are unaffected.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;
use tracing::{debug, error};

use crate::manager::{AsyncManager, RegionId};
use crate::sequence::Sequence;
use crate::task::ManagementTask;

/// Result of one task executed (or skipped) by a region worker.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The phase ran; `updates` is its reported update count.
    Completed { updates: u64 },
    /// The region faulted earlier this tick; the phase did not run.
    Skipped,
    /// The phase callback returned an error (already logged by the worker).
    Failed(crate::manager::ManagerError),
}

/// Reply sent to the dispatcher after each task.
#[derive(Debug)]
pub struct TaskReport {
    pub region: RegionId,
    pub task: ManagementTask,
    pub outcome: TaskOutcome,
}

/// Executor lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecutorState {
    Created = 0,
    Started = 1,
    Halting = 2,
    Halted = 3,
}

impl ExecutorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Started,
            2 => Self::Halting,
            _ => Self::Halted,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("{0} executor has already been started")]
    AlreadyStarted(RegionId),
    #[error("{0} executor is not running")]
    NotRunning(RegionId),
    #[error("{0} executor worker disconnected")]
    Disconnected(RegionId),
    #[error("failed to spawn worker thread for {0}")]
    Spawn(RegionId, #[source] std::io::Error),
}

/// Status the worker publishes after every task so the scheduler can consult
/// the manager without reaching into the worker thread.
#[derive(Debug)]
struct RegionStatus {
    state: AtomicU8,
    first_dynamic_update: AtomicU64,
    max_stage: AtomicU32,
}

struct Envelope {
    task: ManagementTask,
    reply: Sender<TaskReport>,
}

/// One region's executor: a manager, a task queue, and a worker thread.
pub struct RegionExecutor {
    id: RegionId,
    name: Arc<str>,
    sequence: Sequence,
    status: Arc<RegionStatus>,
    killed: AtomicBool,
    tx: Sender<Envelope>,
    rx: Option<Receiver<Envelope>>,
    manager: Option<Box<dyn AsyncManager>>,
    handle: Option<JoinHandle<()>>,
}

impl RegionExecutor {
    #[must_use]
    pub fn new(id: RegionId, name: impl Into<Arc<str>>, manager: Box<dyn AsyncManager>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let status = Arc::new(RegionStatus {
            state: AtomicU8::new(ExecutorState::Created as u8),
            first_dynamic_update: AtomicU64::new(manager.first_dynamic_update_time()),
            max_stage: AtomicU32::new(manager.max_stage()),
        });
        Self {
            id,
            name: name.into(),
            sequence: manager.sequence(),
            status,
            killed: AtomicBool::new(false),
            tx,
            rx: Some(rx),
            manager: Some(manager),
            handle: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> RegionId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owned manager's sequence group, cached at construction.
    #[must_use]
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    #[must_use]
    pub fn state(&self) -> ExecutorState {
        ExecutorState::from_u8(self.status.state.load(Ordering::Acquire))
    }

    /// Earliest pending dynamic update as of the manager's last executed
    /// task.
    #[must_use]
    pub fn first_dynamic_update_time(&self) -> u64 {
        self.status.first_dynamic_update.load(Ordering::Acquire)
    }

    /// Start-tick sub-stages the manager wants, as of its last executed
    /// task.
    #[must_use]
    pub fn max_stage(&self) -> u32 {
        self.status.max_stage.load(Ordering::Acquire)
    }

    /// Spawns the worker thread. Valid only once, from the created state.
    pub fn start(&mut self) -> Result<(), ExecutorError> {
        if self
            .status
            .state
            .compare_exchange(
                ExecutorState::Created as u8,
                ExecutorState::Started as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(ExecutorError::AlreadyStarted(self.id));
        }

        let manager = self
            .manager
            .take()
            .unwrap_or_else(|| unreachable!("created executor owns its manager"));
        let rx = self
            .rx
            .take()
            .unwrap_or_else(|| unreachable!("created executor owns its receiver"));
        let id = self.id;
        let name = Arc::clone(&self.name);
        let status = Arc::clone(&self.status);

        let handle = std::thread::Builder::new()
            .name(self.name.to_string())
            .spawn(move || worker(id, &name, manager, &rx, &status))
            .map_err(|err| {
                self.status
                    .state
                    .store(ExecutorState::Halted as u8, Ordering::Release);
                ExecutorError::Spawn(self.id, err)
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Dispatches a task to the worker with a reply channel for its report.
    ///
    /// Returns `Ok(false)` if the task carries a sequence group that does
    /// not apply to this region (the task is not dispatched and no report
    /// will arrive), `Ok(true)` otherwise.
    pub fn submit(
        &self,
        task: ManagementTask,
        reply: &Sender<TaskReport>,
    ) -> Result<bool, ExecutorError> {
        if let Some(sequence) = task.sequence() {
            if !sequence.applies_to(self.sequence) {
                return Ok(false);
            }
        }
        if self.killed.load(Ordering::Acquire) || self.state() != ExecutorState::Started {
            return Err(ExecutorError::NotRunning(self.id));
        }
        self.tx
            .send(Envelope {
                task,
                reply: reply.clone(),
            })
            .map_err(|_| ExecutorError::Disconnected(self.id))?;
        if task == ManagementTask::Kill {
            // Terminal: nothing may be dispatched after a kill.
            self.killed.store(true, Ordering::Release);
        }
        Ok(true)
    }

    /// Requests a halt: a created executor halts immediately, a started one
    /// winds down after draining its queue. Returns whether the request was
    /// accepted.
    pub fn halt(&self) -> bool {
        if self
            .status
            .state
            .compare_exchange(
                ExecutorState::Created as u8,
                ExecutorState::Halted as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.killed.store(true, Ordering::Release);
            return true;
        }
        if self
            .status
            .state
            .compare_exchange(
                ExecutorState::Started as u8,
                ExecutorState::Halting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.killed.store(true, Ordering::Release);
            // Wake the worker so it can wind down; the report is discarded.
            let (reply, _discard) = crossbeam_channel::bounded(1);
            let _ = self.tx.send(Envelope {
                task: ManagementTask::Kill,
                reply,
            });
            return true;
        }
        false
    }

    /// Waits for the worker thread to finish.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(region = %self.name, "worker thread panicked");
            }
        }
    }
}

impl fmt::Debug for RegionExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionExecutor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Stores the halted state when the worker exits, including by unwinding
/// out of a panicking manager callback, so `state()` stays truthful.
struct HaltOnExit<'a>(&'a RegionStatus);

impl Drop for HaltOnExit<'_> {
    fn drop(&mut self) {
        self.0
            .state
            .store(ExecutorState::Halted as u8, Ordering::Release);
    }
}

fn worker(
    id: RegionId,
    name: &str,
    mut manager: Box<dyn AsyncManager>,
    rx: &Receiver<Envelope>,
    status: &RegionStatus,
) {
    let _halted_on_exit = HaltOnExit(status);
    let mut faulted = false;
    while let Ok(Envelope { task, reply }) = rx.recv() {
        if task == ManagementTask::Kill {
            manager.halt();
            debug!(region = %name, "executor killed");
            let _ = reply.send(TaskReport {
                region: id,
                task,
                outcome: TaskOutcome::Completed { updates: 0 },
            });
            break;
        }

        if matches!(task, ManagementTask::StartTick { .. }) {
            faulted = false;
        }
        let outcome = if faulted {
            TaskOutcome::Skipped
        } else {
            match task.execute(&mut *manager) {
                Ok(updates) => TaskOutcome::Completed { updates },
                Err(err) => {
                    error!(
                        region = %name,
                        phase = task.phase_name(),
                        error = %err,
                        "phase callback failed; skipping remaining phases this tick"
                    );
                    faulted = true;
                    TaskOutcome::Failed(err)
                }
            }
        };

        status
            .first_dynamic_update
            .store(manager.first_dynamic_update_time(), Ordering::Release);
        status
            .max_stage
            .store(manager.max_stage(), Ordering::Release);
        let _ = reply.send(TaskReport {
            region: id,
            task,
            outcome,
        });
    }
}
