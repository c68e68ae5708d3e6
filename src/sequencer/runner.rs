use chrono::Utc;
use pickplace_common::{GraspRequest, Stiffness, TaskId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::report::{RunSummary, SequenceEvent, StageRecord};
use super::shutdown::{ShutdownReport, safe_shutdown};
use super::stage::{Precondition, StageContext, StageKind, StagePlan};
use crate::errors::{SequenceError, ServiceError, StageError, StageStep, WaitError};
use crate::geometry::{GraspInterval, PlaceZone, TaskGeometry};
use crate::monitor::{StageGate, StageOutcome};
use crate::service::{CellDrivers, ControlService, spawn_progress_feed};

/// Run-level parameters that are not per stage.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerSettings {
    /// Give up on a stage that has no outcome after this long. `None` waits forever.
    pub feedback_deadline: Option<Duration>,
    /// `None` retries the grasp until it succeeds.
    pub max_grasp_attempts: Option<u32>,
    pub initial_aperture: f64,
    pub release_aperture: f64,
    pub grasp_stiffness: Stiffness,
    pub grasp_request: GraspRequest,
    pub persistent_bundle: String,
    /// Window of the loaded persistent task ids that is kept visible.
    pub visualize_from: usize,
    pub visualize_count: usize,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            feedback_deadline: None,
            max_grasp_attempts: None,
            initial_aperture: 0.3,
            release_aperture: 0.2,
            grasp_stiffness: Stiffness::new(1000.0, 50.0, 30.0, 100.0, 100.0, 10.0),
            grasp_request: GraspRequest::default(),
            persistent_bundle: "task_definitions".to_string(),
            visualize_from: 7,
            visualize_count: 6,
        }
    }
}

fn service_error(stage: &str, step: StageStep) -> impl FnOnce(ServiceError) -> StageError + '_ {
    move |source| StageError::Service {
        stage: stage.to_string(),
        step,
        source,
    }
}

/// Drives the pick/transfer/place pipeline.
///
/// Every stage goes through [`run_stage`](Self::run_stage) with the gate
/// locked from setup until the wait for its outcome. Any fatal failure runs
/// [`safe_shutdown`] before the error is returned.
pub struct Sequencer {
    control: Arc<dyn ControlService>,
    drivers: Arc<dyn CellDrivers>,
    geometry: Arc<dyn TaskGeometry>,
    gate: Arc<StageGate>,
    plan: StagePlan,
    settings: SequencerSettings,
    zones: Vec<PlaceZone>,
    grasp: GraspInterval,
    submitted: Vec<TaskId>,
    persistent_vis: Vec<TaskId>,
    events: Option<UnboundedSender<SequenceEvent>>,
    records: Vec<StageRecord>,
    grasp_attempts: u32,
    pump: Option<JoinHandle<()>>,
}

impl Sequencer {
    pub fn new(
        control: Arc<dyn ControlService>,
        drivers: Arc<dyn CellDrivers>,
        geometry: Arc<dyn TaskGeometry>,
    ) -> Self {
        Self {
            control,
            drivers,
            geometry,
            gate: Arc::new(StageGate::new()),
            plan: StagePlan::default(),
            settings: SequencerSettings::default(),
            zones: vec![PlaceZone::default()],
            grasp: GraspInterval::default(),
            submitted: Vec::new(),
            persistent_vis: Vec::new(),
            events: None,
            records: Vec::new(),
            grasp_attempts: 0,
            pump: None,
        }
    }

    pub fn with_plan(mut self, plan: StagePlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_settings(mut self, settings: SequencerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_zones(mut self, zones: Vec<PlaceZone>) -> Self {
        self.zones = zones;
        self
    }

    /// Grasp interval used until perception reports a usable one.
    pub fn with_grasp(mut self, grasp: GraspInterval) -> Self {
        self.grasp = grasp;
        self
    }

    pub fn with_event_channel(mut self, tx: UnboundedSender<SequenceEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn gate(&self) -> &Arc<StageGate> {
        &self.gate
    }

    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    pub fn grasp(&self) -> &GraspInterval {
        &self.grasp
    }

    /// Stages completed so far, including those of an aborted run.
    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    fn emit(&self, event: SequenceEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event);
        }
    }

    /// Run the whole sequence.
    ///
    /// On a fatal failure the cell is shut down before this returns, and the
    /// error carries the shutdown report.
    pub async fn run(&mut self) -> Result<RunSummary, SequenceError> {
        let feed = self.control.status_feed().await;
        self.pump = Some(spawn_progress_feed(Arc::clone(&self.gate), feed));

        let result = self.run_pipeline().await;

        match result {
            Ok(()) => {
                self.stop_feed();
                let summary = RunSummary {
                    zones: self.zones.len(),
                    grasp_attempts: self.grasp_attempts,
                    records: self.records.clone(),
                };
                info!(
                    stages = summary.records.len(),
                    stagnated = summary.stagnated(),
                    grasp_attempts = summary.grasp_attempts,
                    "Sequence finished"
                );
                self.emit(SequenceEvent::Finished {
                    stages: summary.records.len(),
                });
                Ok(summary)
            }
            Err(cause) => {
                error!(error = %cause, "Sequence failed, shutting down");
                self.emit(SequenceEvent::Aborted {
                    message: cause.to_string(),
                });
                let report = self.shutdown().await;
                Err(SequenceError::Aborted { cause, report })
            }
        }
    }

    /// Run safe shutdown and stop consuming the progress feed.
    ///
    /// Used by [`run`](Self::run) on failure, and by callers that abandon a
    /// run future part way through.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        let report = safe_shutdown(
            self.control.as_ref(),
            &self.gate,
            &mut self.submitted,
            &mut self.persistent_vis,
        )
        .await;
        self.stop_feed();
        report
    }

    fn stop_feed(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }

    async fn run_pipeline(&mut self) -> Result<(), StageError> {
        self.prelude().await?;

        for zone in 0..self.zones.len() {
            info!(zone, of = self.zones.len(), "Starting placement");
            self.grasp_loop(zone).await?;
            self.run_stage(StageKind::ObjectExtract, Some(zone), None)
                .await?;
            self.run_stage(StageKind::ObjectTransfer, Some(zone), None)
                .await?;
            self.run_stage(StageKind::ObjectPlace, Some(zone), None)
                .await?;

            self.drivers
                .gripper_to(self.settings.release_aperture)
                .await
                .map_err(service_error("release", StageStep::Gripper))?;

            self.run_stage(StageKind::GripperExtract, Some(zone), None)
                .await?;
        }

        self.run_stage(StageKind::TransferConfiguration, None, None)
            .await?;
        self.epilogue().await
    }

    /// Sensing configuration, grasp approach and the physical grasp, repeated
    /// until the gripper reports the object acquired.
    async fn grasp_loop(&mut self, zone: usize) -> Result<(), StageError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.run_stage(StageKind::SensingConfiguration, Some(zone), Some(attempt))
                .await?;
            self.run_stage(StageKind::GraspApproach, Some(zone), Some(attempt))
                .await?;

            let acquired = self.acquire_grasp().await?;
            self.grasp_attempts += 1;
            self.emit(SequenceEvent::GraspAttempt {
                zone,
                attempt,
                acquired,
            });

            if acquired {
                info!(zone, attempt, "Grasp acquired");
                return Ok(());
            }
            warn!(zone, attempt, "Grasp not acquired, repeating approach");
            if self
                .settings
                .max_grasp_attempts
                .is_some_and(|max| attempt >= max)
            {
                return Err(StageError::GraspExhausted { attempts: attempt });
            }
        }
    }

    /// Stiffen the arm for grasping, release control and close the gripper.
    pub async fn acquire_grasp(&mut self) -> Result<bool, StageError> {
        self.drivers
            .set_stiffness(self.settings.grasp_stiffness)
            .await
            .map_err(service_error("grasp", StageStep::Stiffness))?;
        self.control
            .activate(false)
            .await
            .map_err(service_error("grasp", StageStep::Deactivate))?;
        self.drivers
            .gripper_grasp(&self.settings.grasp_request)
            .await
            .map_err(service_error("grasp", StageStep::Gripper))
    }

    /// Ask perception for a fresh grasp interval. Keeps the previous one on
    /// any failure and returns whether it was replaced.
    pub async fn refresh_grasp(&mut self) -> bool {
        let sensed = match self.drivers.sense_grasp().await {
            Ok(sensed) => sensed,
            Err(e) => {
                warn!(error = %e, "Could not sense grasp geometry, keeping the last interval");
                return false;
            }
        };
        match GraspInterval::from_sensed(&sensed, &self.grasp) {
            Ok(grasp) => {
                debug!(frame = %grasp.obj_frame, "Grasp interval refreshed");
                self.grasp = grasp;
                true
            }
            Err(e) => {
                warn!(error = %e, "Sensed grasp geometry unusable, keeping the last interval");
                false
            }
        }
    }

    /// Remove every task this sequencer has submitted.
    async fn clear_tasks(&mut self, stage: &str) -> Result<(), StageError> {
        if self.submitted.is_empty() {
            return Ok(());
        }
        self.control
            .remove_tasks(&self.submitted)
            .await
            .map_err(service_error(stage, StageStep::ClearTasks))?;
        self.submitted.clear();
        Ok(())
    }

    /// Execute one stage: tear down the previous task set, submit this one,
    /// arm the monitor, activate control and wait for convergence or
    /// stagnation.
    pub async fn run_stage(
        &mut self,
        kind: StageKind,
        zone: Option<usize>,
        attempt: Option<u32>,
    ) -> Result<StageOutcome, StageError> {
        let spec = self.plan.spec(kind).clone();
        let stage = kind.name();
        self.emit(SequenceEvent::StageStarted {
            kind,
            zone,
            attempt,
        });
        info!(stage, ?zone, "Starting {}", kind.description());

        let gate = Arc::clone(&self.gate);
        let mut state = gate.lock().await;
        let started_at = Utc::now();
        let started = Instant::now();
        let before = gate.stats();

        gate.reset_outcome(&state);
        self.control
            .activate(false)
            .await
            .map_err(service_error(stage, StageStep::Deactivate))?;
        self.clear_tasks(stage).await?;
        state.clear();

        if spec.precondition == Some(Precondition::RefreshGrasp) {
            self.refresh_grasp().await;
        }

        if let Some(stiffness) = spec.stiffness {
            self.drivers
                .set_stiffness(stiffness)
                .await
                .map_err(service_error(stage, StageStep::Stiffness))?;
        }

        let ctx = StageContext {
            grasp: &self.grasp,
            zone: zone.and_then(|i| self.zones.get(i)),
        };
        let tasks = self.geometry.tasks(kind, &ctx);
        let ids = self
            .control
            .set_tasks(&tasks)
            .await
            .map_err(service_error(stage, StageStep::Submit))?;
        self.submitted = ids.clone();
        if ids.len() != tasks.len() {
            return Err(StageError::IdMismatch {
                stage: stage.to_string(),
                submitted: tasks.len(),
                returned: ids.len(),
            });
        }

        let monitored = spec.monitor.select(&ids);
        let visible = spec.visualize.select(&self.persistent_vis, &ids);
        self.control
            .visualize(&visible)
            .await
            .map_err(service_error(stage, StageStep::Visualize))?;

        debug!(
            stage,
            tasks = ids.len(),
            monitored = ?monitored,
            error_tol = spec.tolerances.error_tol,
            "Stage tasks submitted"
        );
        state.arm(monitored.clone(), spec.tolerances);

        self.control
            .activate(true)
            .await
            .map_err(service_error(stage, StageStep::Activate))?;

        let (outcome, mut state) = match gate
            .wait_outcome(state, self.settings.feedback_deadline)
            .await
        {
            Ok(decided) => decided,
            Err(WaitError::Deadline(waited)) => {
                return Err(StageError::FeedbackTimeout {
                    stage: stage.to_string(),
                    waited,
                });
            }
            Err(WaitError::Closed) => {
                return Err(StageError::MonitorClosed {
                    stage: stage.to_string(),
                });
            }
        };
        state.disarm();
        drop(state);

        let record = StageRecord {
            kind,
            zone,
            attempt,
            started_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            outcome,
            submitted: ids,
            monitored,
            tolerances: spec.tolerances,
            samples: gate.stats().since(&before),
        };
        info!(
            stage,
            %outcome,
            duration_ms = record.duration_ms,
            "Stage complete"
        );
        self.records.push(record.clone());
        self.emit(SequenceEvent::StageCompleted { record });
        Ok(outcome)
    }

    /// Bring the truck into position and start from a clean controller with
    /// the persistent tasks loaded.
    async fn prelude(&mut self) -> Result<(), StageError> {
        const STAGE: &str = "prelude";
        self.emit(SequenceEvent::Prelude);

        for _ in 0..2 {
            self.drivers
                .advance_truck()
                .await
                .map_err(service_error(STAGE, StageStep::Truck))?;
        }
        self.reset_cell(STAGE).await?;

        let loaded = self
            .control
            .load_tasks(&self.settings.persistent_bundle)
            .await
            .map_err(service_error(STAGE, StageStep::LoadPersistent))?;
        self.persistent_vis = self.persistent_window(&loaded);
        info!(
            bundle = %self.settings.persistent_bundle,
            loaded = loaded.len(),
            visible = self.persistent_vis.len(),
            "Persistent tasks loaded"
        );
        self.control
            .visualize(&self.persistent_vis)
            .await
            .map_err(service_error(STAGE, StageStep::Visualize))?;

        self.drivers
            .gripper_to(self.settings.initial_aperture)
            .await
            .map_err(service_error(STAGE, StageStep::Gripper))
    }

    /// Hand control back and drive the truck home.
    async fn epilogue(&mut self) -> Result<(), StageError> {
        const STAGE: &str = "epilogue";
        self.reset_cell(STAGE).await?;
        for _ in 0..2 {
            self.drivers
                .advance_truck()
                .await
                .map_err(service_error(STAGE, StageStep::Truck))?;
        }
        Ok(())
    }

    /// Deactivate, drop every task and the monitored set, reset the controller.
    async fn reset_cell(&mut self, stage: &str) -> Result<(), StageError> {
        let gate = Arc::clone(&self.gate);
        let mut state = gate.lock().await;

        self.control
            .activate(false)
            .await
            .map_err(service_error(stage, StageStep::Deactivate))?;
        self.clear_tasks(stage).await?;
        state.clear();
        self.control
            .reset()
            .await
            .map_err(service_error(stage, StageStep::ResetController))?;
        self.persistent_vis.clear();
        Ok(())
    }

    fn persistent_window(&self, loaded: &[TaskId]) -> Vec<TaskId> {
        let start = self.settings.visualize_from.min(loaded.len());
        let end = self
            .settings
            .visualize_from
            .saturating_add(self.settings.visualize_count)
            .min(loaded.len());
        if end - start < self.settings.visualize_count {
            warn!(
                loaded = loaded.len(),
                from = self.settings.visualize_from,
                count = self.settings.visualize_count,
                "Persistent bundle smaller than the visualization window"
            );
        }
        loaded[start..end].to_vec()
    }
}
