pub mod logger;

pub use logger::RunLogger;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sequencer::{ShutdownReport, StageRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub config: RunConfig,
    pub outcome: RunOutcome,
    pub stages: Vec<StageRecord>,
    /// Present when the run went through safe shutdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown: Option<ShutdownReport>,
}

impl RunRecord {
    pub fn new(config: RunConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            config,
            outcome: RunOutcome::InProgress,
            stages: Vec::new(),
            shutdown: None,
        }
    }

    pub fn finish(&mut self, outcome: RunOutcome) {
        self.ended_at = Some(Utc::now());
        self.outcome = outcome;
    }
}

/// The settings a run was started with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub config_file: Option<String>,
    pub zones: usize,
    pub max_grasp_attempts: Option<u32>,
    pub feedback_deadline_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    InProgress,
    Completed { grasp_attempts: u32 },
    Aborted { error: String },
    Interrupted,
}
