//! Typed error hierarchy for the pickplace sequencer.
//!
//! Three top-level enums cover the three layers:
//! - `ServiceError`: a single controller or driver call failed
//! - `StageError`: a stage (or a step between stages) could not complete
//! - `SequenceError`: the run was aborted and safe shutdown executed

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::sequencer::ShutdownReport;

/// Errors from a single call to the controller or a cell driver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    /// The service answered but reported `success = false`.
    #[error("{call} was rejected by the service")]
    Rejected { call: &'static str },

    #[error("{call} could not reach the service: {message}")]
    Unreachable { call: &'static str, message: String },
}

impl ServiceError {
    pub fn call(&self) -> &'static str {
        match self {
            ServiceError::Rejected { call } | ServiceError::Unreachable { call, .. } => call,
        }
    }
}

/// The protocol step a service failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStep {
    Deactivate,
    ClearTasks,
    Stiffness,
    Submit,
    Visualize,
    Activate,
    Gripper,
    Truck,
    LoadPersistent,
    ResetController,
}

impl fmt::Display for StageStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageStep::Deactivate => "deactivate control",
            StageStep::ClearTasks => "clear tasks",
            StageStep::Stiffness => "set stiffness",
            StageStep::Submit => "submit tasks",
            StageStep::Visualize => "visualize tasks",
            StageStep::Activate => "activate control",
            StageStep::Gripper => "gripper",
            StageStep::Truck => "advance truck",
            StageStep::LoadPersistent => "load persistent tasks",
            StageStep::ResetController => "reset controller",
        };
        write!(f, "{}", name)
    }
}

/// Errors that end a stage. Every variant is fatal to the run.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{stage}: {step} failed: {source}")]
    Service {
        stage: String,
        step: StageStep,
        #[source]
        source: ServiceError,
    },

    #[error("{stage}: submitted {submitted} tasks but the controller returned {returned} ids")]
    IdMismatch {
        stage: String,
        submitted: usize,
        returned: usize,
    },

    #[error("{stage}: no convergence decision within {waited:?}")]
    FeedbackTimeout { stage: String, waited: Duration },

    #[error("{stage}: convergence monitor closed while waiting")]
    MonitorClosed { stage: String },

    #[error("Grasp not acquired after {attempts} attempts")]
    GraspExhausted { attempts: u32 },
}

/// Errors waiting on the stage gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("deadline of {0:?} elapsed")]
    Deadline(Duration),

    #[error("outcome channel closed")]
    Closed,
}

/// Terminal error of a run. Safe shutdown has already executed when this is returned.
#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("Sequence aborted: {cause}")]
    Aborted {
        #[source]
        cause: StageError,
        report: ShutdownReport,
    },
}

impl SequenceError {
    pub fn report(&self) -> &ShutdownReport {
        match self {
            SequenceError::Aborted { report, .. } => report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_rejected_names_call() {
        let err = ServiceError::Rejected { call: "set_tasks" };
        assert_eq!(err.call(), "set_tasks");
        assert!(err.to_string().contains("set_tasks"));
    }

    #[test]
    fn stage_error_service_carries_step_and_source() {
        let err = StageError::Service {
            stage: "object_place".to_string(),
            step: StageStep::Submit,
            source: ServiceError::Rejected { call: "set_tasks" },
        };
        match &err {
            StageError::Service { step, source, .. } => {
                assert_eq!(*step, StageStep::Submit);
                assert_eq!(source.call(), "set_tasks");
            }
            _ => panic!("Expected Service variant"),
        }
        let msg = err.to_string();
        assert!(msg.contains("object_place"));
        assert!(msg.contains("submit tasks"));
    }

    #[test]
    fn stage_error_id_mismatch_carries_counts() {
        let err = StageError::IdMismatch {
            stage: "grasp_approach".to_string(),
            submitted: 6,
            returned: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains('6'));
        assert!(msg.contains('5'));
    }

    #[test]
    fn stage_error_grasp_exhausted_carries_attempts() {
        let err = StageError::GraspExhausted { attempts: 3 };
        match &err {
            StageError::GraspExhausted { attempts } => assert_eq!(*attempts, 3),
            _ => panic!("Expected GraspExhausted"),
        }
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn sequence_error_exposes_report() {
        let err = SequenceError::Aborted {
            cause: StageError::GraspExhausted { attempts: 1 },
            report: ShutdownReport {
                deactivated: true,
                tasks_cleared: true,
                controller_reset: false,
            },
        };
        assert!(!err.report().is_clean());
        assert!(err.to_string().starts_with("Sequence aborted"));
    }
}
