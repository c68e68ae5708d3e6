//! Shared domain types for the pickplace sequencer.
//!
//! These are the values exchanged with a task-priority controller and the
//! cell drivers: task descriptors and their geometric primitives, progress
//! status messages, stiffness settings and grasp requests.

pub mod cell;
pub mod geometry;
pub mod status;
pub mod task;

pub use cell::{GraspRequest, SensedGeometry, SensedPrimitive, Stiffness};
pub use geometry::{Geometry, GeometryError, GeometryTag};
pub use status::{TaskStatus, TaskStatusArray};
pub use task::{Dynamics, TaskDescriptor, TaskId, TaskKind, TaskLink};
