use pickplace_common::TaskId;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::monitor::StageGate;
use crate::service::ControlService;

/// Which shutdown steps went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub deactivated: bool,
    pub tasks_cleared: bool,
    pub controller_reset: bool,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.deactivated && self.tasks_cleared && self.controller_reset
    }
}

/// Bring the cell to rest after a fatal failure.
///
/// Deactivates control, removes every submitted task, forgets the monitored
/// set, resets the controller and drops the persistent visualization handles.
/// Each step runs even when an earlier one failed. The caller must not hold
/// the gate lock.
pub async fn safe_shutdown(
    control: &dyn ControlService,
    gate: &StageGate,
    submitted: &mut Vec<TaskId>,
    persistent_vis: &mut Vec<TaskId>,
) -> ShutdownReport {
    warn!(submitted = submitted.len(), "Running safe shutdown");
    let mut state = gate.lock().await;
    state.disarm();

    let deactivated = match control.activate(false).await {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "Safe shutdown: could not deactivate control");
            false
        }
    };

    let tasks_cleared = if submitted.is_empty() {
        true
    } else {
        match control.remove_tasks(submitted).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, tasks = ?submitted, "Safe shutdown: could not remove tasks");
                false
            }
        }
    };
    state.clear();

    let controller_reset = match control.reset().await {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "Safe shutdown: could not reset controller");
            false
        }
    };

    submitted.clear();
    persistent_vis.clear();
    drop(state);

    let report = ShutdownReport {
        deactivated,
        tasks_cleared,
        controller_reset,
    };
    if report.is_clean() {
        info!("Safe shutdown complete");
    } else {
        error!(?report, "Safe shutdown incomplete");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ServiceError;
    use crate::monitor::Tolerances;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use futures_util::stream::BoxStream;
    use pickplace_common::{TaskDescriptor, TaskStatusArray};
    use std::sync::Mutex;

    /// Records calls and fails the ones named in `failing`.
    #[derive(Default)]
    struct ScriptedControl {
        failing: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedControl {
        fn failing(calls: &[&'static str]) -> Self {
            Self {
                failing: calls.to_vec(),
                ..Self::default()
            }
        }

        fn record(&self, call: &'static str, detail: String) -> Result<(), ServiceError> {
            self.calls.lock().unwrap().push(format!("{}{}", call, detail));
            if self.failing.contains(&call) {
                Err(ServiceError::Rejected { call })
            } else {
                Ok(())
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ControlService for ScriptedControl {
        async fn set_tasks(&self, _tasks: &[TaskDescriptor]) -> Result<Vec<TaskId>, ServiceError> {
            self.record("set_tasks", String::new())?;
            Ok(Vec::new())
        }

        async fn remove_tasks(&self, ids: &[TaskId]) -> Result<(), ServiceError> {
            self.record("remove_tasks", format!("({})", ids.len()))
        }

        async fn activate(&self, active: bool) -> Result<(), ServiceError> {
            self.record("activate", format!("({})", active))
        }

        async fn reset(&self) -> Result<(), ServiceError> {
            self.record("reset", String::new())
        }

        async fn load_tasks(&self, _bundle: &str) -> Result<Vec<TaskId>, ServiceError> {
            self.record("load_tasks", String::new())?;
            Ok(Vec::new())
        }

        async fn visualize(&self, _ids: &[TaskId]) -> Result<(), ServiceError> {
            self.record("visualize", String::new())
        }

        async fn status_feed(&self) -> BoxStream<'static, TaskStatusArray> {
            futures_util::stream::empty().boxed()
        }
    }

    #[tokio::test]
    async fn test_clean_shutdown_clears_everything() {
        let control = ScriptedControl::default();
        let gate = StageGate::new();
        gate.lock()
            .await
            .arm(vec![TaskId(3)], Tolerances::default());
        let mut submitted = vec![TaskId(3), TaskId(4)];
        let mut vis = vec![TaskId(1)];

        let report = safe_shutdown(&control, &gate, &mut submitted, &mut vis).await;

        assert!(report.is_clean());
        assert!(submitted.is_empty());
        assert!(vis.is_empty());
        assert_eq!(
            control.calls(),
            vec!["activate(false)", "remove_tasks(2)", "reset"]
        );
        let state = gate.lock().await;
        assert!(!state.is_armed());
        assert!(state.monitored().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_continues_past_failures() {
        let control = ScriptedControl::failing(&["activate", "remove_tasks"]);
        let gate = StageGate::new();
        let mut submitted = vec![TaskId(9)];
        let mut vis = Vec::new();

        let report = safe_shutdown(&control, &gate, &mut submitted, &mut vis).await;

        assert_eq!(
            report,
            ShutdownReport {
                deactivated: false,
                tasks_cleared: false,
                controller_reset: true,
            }
        );
        assert!(!report.is_clean());
        assert_eq!(control.calls().last().map(String::as_str), Some("reset"));
        assert!(submitted.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_skips_removal_when_nothing_submitted() {
        let control = ScriptedControl::default();
        let gate = StageGate::new();

        let report = safe_shutdown(&control, &gate, &mut Vec::new(), &mut Vec::new()).await;

        assert!(report.tasks_cleared);
        assert_eq!(control.calls(), vec!["activate(false)", "reset"]);
    }
}
