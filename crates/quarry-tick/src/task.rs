//! Management tasks.
//!
//! The commands the scheduler dispatches to a region executor to drive it
//! through the tick phases and its lifecycle. Each is consumed exactly once
//! by a single region's worker thread, and carries only scalar parameters so
//! a future distributed scheduler could ship them across a network.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::manager::{AsyncManager, ManagerError};
use crate::sequence::Sequence;

/// A single phase or lifecycle command for one region executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagementTask {
    /// Begin a tick sub-stage.
    StartTick { stage: u32, delta_millis: u64 },
    /// Run physics for one sequence group.
    Physics { sequence: Sequence },
    /// Run dynamic updates due at or before `threshold` for one group.
    DynamicUpdates { threshold: u64, sequence: Sequence },
    /// Run lighting for one sequence group.
    Lighting { sequence: Sequence },
    /// Last live mutation of the tick.
    Finalize,
    /// Monitor-only pre-snapshot pass.
    PreSnapshot,
    /// Publish live state as the new snapshot.
    CopySnapshot,
    /// Terminal: drain and stop the executor. No tasks may follow.
    Kill,
}

impl ManagementTask {
    /// Phase name for log messages.
    #[must_use]
    pub const fn phase_name(self) -> &'static str {
        match self {
            Self::StartTick { .. } => "start-tick",
            Self::Physics { .. } => "physics",
            Self::DynamicUpdates { .. } => "dynamic-updates",
            Self::Lighting { .. } => "lighting",
            Self::Finalize => "finalize",
            Self::PreSnapshot => "pre-snapshot",
            Self::CopySnapshot => "copy-snapshot",
            Self::Kill => "kill",
        }
    }

    /// The sequence group this task is restricted to, if any.
    #[must_use]
    pub const fn sequence(self) -> Option<Sequence> {
        match self {
            Self::Physics { sequence }
            | Self::DynamicUpdates { sequence, .. }
            | Self::Lighting { sequence } => Some(sequence),
            _ => None,
        }
    }

    /// Runs this task's phase against a manager, returning the number of
    /// updates the phase performed. `Kill` is handled by the executor loop,
    /// not here.
    pub(crate) fn execute(self, manager: &mut dyn AsyncManager) -> Result<u64, ManagerError> {
        match self {
            Self::StartTick {
                stage,
                delta_millis,
            } => manager
                .start_tick(stage, Duration::from_millis(delta_millis))
                .map(|()| 0),
            Self::Physics { sequence } => manager.run_physics(sequence),
            Self::DynamicUpdates {
                threshold,
                sequence,
            } => manager.run_dynamic_updates(threshold, sequence),
            Self::Lighting { sequence } => manager.run_lighting(sequence),
            Self::Finalize => manager.finalize_tick().map(|()| 0),
            Self::PreSnapshot => manager.pre_snapshot().map(|()| 0),
            Self::CopySnapshot => manager.copy_snapshot().map(|()| 0),
            Self::Kill => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::sequence::Direction;

    use super::*;

    #[test]
    fn test_tasks_round_trip_through_serde() {
        let tasks = [
            ManagementTask::StartTick {
                stage: 1,
                delta_millis: 50,
            },
            ManagementTask::Physics {
                sequence: Sequence::Local,
            },
            ManagementTask::DynamicUpdates {
                threshold: 12345,
                sequence: Sequence::Neighbor(Direction::new(1, -1, 0).unwrap()),
            },
            ManagementTask::Lighting {
                sequence: Sequence::Neighbor(Direction::new(0, 0, 1).unwrap()),
            },
            ManagementTask::Finalize,
            ManagementTask::PreSnapshot,
            ManagementTask::CopySnapshot,
            ManagementTask::Kill,
        ];

        for task in tasks {
            let json = serde_json::to_string(&task).unwrap();
            let parsed: ManagementTask = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, task);
        }
    }

    #[test]
    fn test_sequence_extraction() {
        assert_eq!(
            ManagementTask::Physics {
                sequence: Sequence::Local
            }
            .sequence(),
            Some(Sequence::Local)
        );
        assert_eq!(ManagementTask::Finalize.sequence(), None);
        assert_eq!(ManagementTask::Kill.sequence(), None);
    }
}
