use chrono::{DateTime, Utc};
use pickplace_common::TaskId;
use serde::{Deserialize, Serialize};

use super::stage::StageKind;
use crate::monitor::{GateStats, StageOutcome, Tolerances};

/// What one completed stage looked like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub kind: StageKind,
    /// Placement zone index; `None` for the final transfer configuration.
    pub zone: Option<usize>,
    /// Grasp attempt the stage belongs to, for the stages inside the grasp loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: StageOutcome,
    pub submitted: Vec<TaskId>,
    pub monitored: Vec<TaskId>,
    pub tolerances: Tolerances,
    /// Gate counters accumulated while the stage ran.
    pub samples: GateStats,
}

/// Progress notifications for a live display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SequenceEvent {
    Prelude,
    StageStarted {
        kind: StageKind,
        zone: Option<usize>,
        attempt: Option<u32>,
    },
    StageCompleted {
        record: StageRecord,
    },
    GraspAttempt {
        zone: usize,
        attempt: u32,
        acquired: bool,
    },
    Aborted {
        message: String,
    },
    Finished {
        stages: usize,
    },
}

/// Result of a run that reached the epilogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub zones: usize,
    pub grasp_attempts: u32,
    pub records: Vec<StageRecord>,
}

impl RunSummary {
    pub fn stagnated(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome == StageOutcome::Stagnated)
            .count()
    }
}
