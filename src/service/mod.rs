//! Interfaces to the external collaborators.
//!
//! The sequencer never talks to a concrete controller or driver stack. It
//! holds trait objects for the task-priority controller ([`ControlService`])
//! and the cell hardware ([`CellDrivers`]); the [`sim`](crate::sim) module
//! provides in-process implementations of both.

pub mod feed;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use pickplace_common::{
    GraspRequest, SensedGeometry, Stiffness, TaskDescriptor, TaskId, TaskStatusArray,
};

use crate::errors::ServiceError;

pub use feed::spawn_progress_feed;

/// The task-priority controller.
///
/// # Contract
///
/// * `set_tasks` – returns one id per submitted descriptor, in order.
/// * `remove_tasks` – removes live tasks; unknown ids are a rejection.
/// * `activate` – switches closed-loop control on or off.
/// * `status_feed` – live stream of progress for every task the controller
///   knows about, published whether or not control is active.
#[async_trait]
pub trait ControlService: Send + Sync {
    async fn set_tasks(&self, tasks: &[TaskDescriptor]) -> Result<Vec<TaskId>, ServiceError>;

    async fn remove_tasks(&self, ids: &[TaskId]) -> Result<(), ServiceError>;

    async fn activate(&self, active: bool) -> Result<(), ServiceError>;

    /// Drop every task, persistent ones included, and return to the idle state.
    async fn reset(&self) -> Result<(), ServiceError>;

    /// Load a named bundle of persistent tasks (joint limits, obstacles).
    async fn load_tasks(&self, bundle: &str) -> Result<Vec<TaskId>, ServiceError>;

    async fn visualize(&self, ids: &[TaskId]) -> Result<(), ServiceError>;

    async fn status_feed(&self) -> BoxStream<'static, TaskStatusArray>;
}

/// Arm, gripper, perception and truck drivers.
#[async_trait]
pub trait CellDrivers: Send + Sync {
    async fn set_stiffness(&self, stiffness: Stiffness) -> Result<(), ServiceError>;

    /// Fetch the grasp geometry from perception.
    async fn sense_grasp(&self) -> Result<SensedGeometry, ServiceError>;

    /// Move the gripper to an aperture.
    async fn gripper_to(&self, aperture: f64) -> Result<(), ServiceError>;

    /// Close the gripper on the object. `Ok(false)` means the grasp was not acquired.
    async fn gripper_grasp(&self, request: &GraspRequest) -> Result<bool, ServiceError>;

    /// Advance the truck to its next scripted pose.
    async fn advance_truck(&self) -> Result<(), ServiceError>;
}
