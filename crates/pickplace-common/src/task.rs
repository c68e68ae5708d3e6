//! Task descriptors submitted to the controller.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::Geometry;

/// Handle assigned by the controller when a task is submitted.
///
/// Unique among live tasks. Values are opaque to the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for TaskId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Kind of constraint a task expresses between its two links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Projection,
    Parallel,
    Coplanar,
    JointSetpoint,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Projection => write!(f, "projection"),
            TaskKind::Parallel => write!(f, "parallel"),
            TaskKind::Coplanar => write!(f, "coplanar"),
            TaskKind::JointSetpoint => write!(f, "joint_setpoint"),
        }
    }
}

/// Task dynamics requested from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Dynamics {
    /// First-order linear convergence with the given gain.
    Linear { gain: f64 },
}

impl Dynamics {
    pub fn gain(&self) -> f64 {
        match self {
            Dynamics::Linear { gain } => *gain,
        }
    }
}

impl Default for Dynamics {
    fn default() -> Self {
        Dynamics::Linear { gain: 1.0 }
    }
}

/// One side of a task: a frame and the primitives attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLink {
    pub frame: String,
    pub geometries: Vec<Geometry>,
}

impl TaskLink {
    pub fn new(frame: impl Into<String>, geometries: Vec<Geometry>) -> Self {
        Self {
            frame: frame.into(),
            geometries,
        }
    }
}

/// A single motion constraint for the task-priority controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub name: String,
    pub kind: TaskKind,
    pub priority: u32,
    pub is_equality: bool,
    pub task_frame: String,
    /// Safety distance for inequality tasks.
    pub ds: f64,
    /// Influence distance for inequality tasks.
    pub di: f64,
    pub dynamics: Dynamics,
    pub links: Vec<TaskLink>,
}

impl TaskDescriptor {
    pub fn new(name: impl Into<String>, kind: TaskKind, priority: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            priority,
            is_equality: false,
            task_frame: "world".to_string(),
            ds: 0.0,
            di: 1.0,
            dynamics: Dynamics::default(),
            links: Vec::new(),
        }
    }

    pub fn equality(mut self) -> Self {
        self.is_equality = true;
        self
    }

    pub fn with_task_frame(mut self, frame: impl Into<String>) -> Self {
        self.task_frame = frame.into();
        self
    }

    pub fn with_gain(mut self, gain: f64) -> Self {
        self.dynamics = Dynamics::Linear { gain };
        self
    }

    pub fn with_distances(mut self, ds: f64, di: f64) -> Self {
        self.ds = ds;
        self.di = di;
        self
    }

    pub fn with_link(mut self, link: TaskLink) -> Self {
        self.links.push(link);
        self
    }
}
