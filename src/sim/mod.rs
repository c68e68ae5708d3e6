//! In-process stand-ins for the controller and the cell drivers.
//!
//! [`SimController`] keeps a table of live tasks whose progress decays
//! exponentially toward a floor while control is active, and publishes the
//! whole table on every tick. It is a residual model, nothing more.

pub mod drivers;

pub use drivers::{SimDrivers, SimDriversSettings};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use pickplace_common::{TaskDescriptor, TaskId, TaskStatus, TaskStatusArray};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, trace};

use crate::errors::ServiceError;
use crate::service::ControlService;

#[derive(Debug, Clone, PartialEq)]
pub struct SimSettings {
    /// Status messages published per second.
    pub rate_hz: f64,
    /// Multiplier on every task gain.
    pub speedup: f64,
    /// Magnitude of a freshly submitted task's progress.
    pub initial_residual: f64,
    /// Progress equality tasks settle at instead of zero.
    pub residual_floor: f64,
    /// Tasks created by loading a persistent bundle.
    pub persistent_count: usize,
    /// Reject the N-th `set_tasks` call, counting from 1.
    pub reject_submission: Option<u32>,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            rate_hz: 50.0,
            speedup: 4.0,
            initial_residual: 0.5,
            residual_floor: 0.0,
            persistent_count: 16,
            reject_submission: None,
        }
    }
}

#[derive(Debug, Clone)]
struct SimTask {
    name: String,
    progress: f64,
    floor: f64,
    rate: f64,
    persistent: bool,
}

#[derive(Debug, Default)]
struct SimWorld {
    next_id: u32,
    tasks: BTreeMap<TaskId, SimTask>,
    active: bool,
    submissions: u32,
}

impl SimWorld {
    fn allocate(&mut self) -> TaskId {
        self.next_id += 1;
        TaskId(self.next_id)
    }

    fn step(&mut self, dt: f64) {
        if !self.active {
            return;
        }
        for task in self.tasks.values_mut().filter(|t| !t.persistent) {
            let target = task.floor.copysign(task.progress);
            task.progress = target + (task.progress - target) * (-task.rate * dt).exp();
        }
    }

    fn snapshot(&self) -> TaskStatusArray {
        TaskStatusArray::new(
            self.tasks
                .iter()
                .map(|(id, t)| TaskStatus::new(*id, t.name.clone(), t.progress))
                .collect(),
        )
    }
}

/// Shortest interval between two published status messages.
pub const MIN_TICK: Duration = Duration::from_millis(1);

/// Tick period for a publish rate. Rates below 1 Hz (and NaN) tick once per
/// second; rates above 1 kHz are capped at [`MIN_TICK`].
fn tick_period(rate_hz: f64) -> Duration {
    let hz = rate_hz.max(1.0);
    Duration::try_from_secs_f64(hz.recip())
        .unwrap_or(MIN_TICK)
        .max(MIN_TICK)
}

/// Simulated task-priority controller.
///
/// Must be created inside a tokio runtime; the publishing ticker runs until
/// the controller is dropped.
pub struct SimController {
    settings: SimSettings,
    world: Arc<Mutex<SimWorld>>,
    tx: broadcast::Sender<TaskStatusArray>,
    ticker: JoinHandle<()>,
}

impl SimController {
    pub fn new(settings: SimSettings) -> Self {
        let world = Arc::new(Mutex::new(SimWorld::default()));
        let (tx, _) = broadcast::channel(64);
        let period = tick_period(settings.rate_hz);

        let ticker = {
            let world = Arc::clone(&world);
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    let snapshot = {
                        let mut world = world.lock().await;
                        world.step(period.as_secs_f64());
                        world.snapshot()
                    };
                    trace!(tasks = snapshot.len(), "sim tick");
                    // no subscribers is fine
                    let _ = tx.send(snapshot);
                }
            })
        };

        Self {
            settings,
            world,
            tx,
            ticker,
        }
    }

    pub fn settings(&self) -> &SimSettings {
        &self.settings
    }

    pub async fn is_active(&self) -> bool {
        self.world.lock().await.active
    }

    /// Ids of every live task, persistent ones included.
    pub async fn live_tasks(&self) -> Vec<TaskId> {
        self.world.lock().await.tasks.keys().copied().collect()
    }
}

impl Drop for SimController {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

#[async_trait]
impl ControlService for SimController {
    async fn set_tasks(&self, tasks: &[TaskDescriptor]) -> Result<Vec<TaskId>, ServiceError> {
        let mut world = self.world.lock().await;
        world.submissions += 1;
        if self.settings.reject_submission == Some(world.submissions) {
            debug!(submission = world.submissions, "sim rejecting submission");
            return Err(ServiceError::Rejected { call: "set_tasks" });
        }

        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            let id = world.allocate();
            let sign = if id.0 % 2 == 0 { -1.0 } else { 1.0 };
            let floor = if task.is_equality {
                self.settings.residual_floor
            } else {
                0.0
            };
            world.tasks.insert(
                id,
                SimTask {
                    name: task.name.clone(),
                    progress: sign * self.settings.initial_residual,
                    floor,
                    rate: task.dynamics.gain().abs() * self.settings.speedup,
                    persistent: false,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn remove_tasks(&self, ids: &[TaskId]) -> Result<(), ServiceError> {
        let mut world = self.world.lock().await;
        if ids.iter().any(|id| !world.tasks.contains_key(id)) {
            return Err(ServiceError::Rejected {
                call: "remove_tasks",
            });
        }
        for id in ids {
            world.tasks.remove(id);
        }
        Ok(())
    }

    async fn activate(&self, active: bool) -> Result<(), ServiceError> {
        self.world.lock().await.active = active;
        Ok(())
    }

    async fn reset(&self) -> Result<(), ServiceError> {
        let mut world = self.world.lock().await;
        world.tasks.clear();
        world.active = false;
        Ok(())
    }

    async fn load_tasks(&self, bundle: &str) -> Result<Vec<TaskId>, ServiceError> {
        let mut world = self.world.lock().await;
        let mut ids = Vec::with_capacity(self.settings.persistent_count);
        for i in 0..self.settings.persistent_count {
            let id = world.allocate();
            world.tasks.insert(
                id,
                SimTask {
                    name: format!("{}_{}", bundle, i),
                    progress: 0.0,
                    floor: 0.0,
                    rate: 0.0,
                    persistent: true,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn visualize(&self, ids: &[TaskId]) -> Result<(), ServiceError> {
        trace!(ids = ?ids, "sim visualize");
        Ok(())
    }

    async fn status_feed(&self) -> BoxStream<'static, TaskStatusArray> {
        // lagged receivers skip ahead to the newest message
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|msg| async move { msg.ok() })
            .boxed()
    }
}
