//! Stage descriptions.
//!
//! Every stage of the pipeline runs through the same protocol; what differs
//! between them is captured in a [`StageSpec`]: the tolerances, which of the
//! submitted tasks are monitored and visualized, the arm stiffness, and
//! whether the grasp geometry is refreshed first.

use pickplace_common::{Stiffness, TaskId};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::{GraspInterval, PlaceZone};
use crate::monitor::Tolerances;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    SensingConfiguration,
    GraspApproach,
    ObjectExtract,
    ObjectTransfer,
    ObjectPlace,
    GripperExtract,
    TransferConfiguration,
}

impl StageKind {
    pub const ALL: [StageKind; 7] = [
        StageKind::SensingConfiguration,
        StageKind::GraspApproach,
        StageKind::ObjectExtract,
        StageKind::ObjectTransfer,
        StageKind::ObjectPlace,
        StageKind::GripperExtract,
        StageKind::TransferConfiguration,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::SensingConfiguration => "sensing_configuration",
            StageKind::GraspApproach => "grasp_approach",
            StageKind::ObjectExtract => "object_extract",
            StageKind::ObjectTransfer => "object_transfer",
            StageKind::ObjectPlace => "object_place",
            StageKind::GripperExtract => "gripper_extract",
            StageKind::TransferConfiguration => "transfer_configuration",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            StageKind::SensingConfiguration => "manipulator sensing configuration",
            StageKind::GraspApproach => "grasp approach",
            StageKind::ObjectExtract => "object extract",
            StageKind::ObjectTransfer => "object transfer configuration",
            StageKind::ObjectPlace => "object place",
            StageKind::GripperExtract => "gripper extract",
            StageKind::TransferConfiguration => "manipulator transfer configuration",
        }
    }

    /// Whether the stage drives the arm to a joint configuration.
    pub fn is_joint_configuration(&self) -> bool {
        matches!(
            self,
            StageKind::SensingConfiguration
                | StageKind::ObjectTransfer
                | StageKind::TransferConfiguration
        )
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Which of a stage's submitted tasks must settle before it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPolicy {
    All,
    /// Only the final task, e.g. the joint setpoint of a configuration stage.
    Last,
    /// Nothing is monitored; the stage completes on the first sample.
    Nothing,
}

impl MonitorPolicy {
    pub fn select(&self, ids: &[TaskId]) -> Vec<TaskId> {
        match self {
            MonitorPolicy::All => ids.to_vec(),
            MonitorPolicy::Last => ids.last().copied().into_iter().collect(),
            MonitorPolicy::Nothing => Vec::new(),
        }
    }
}

impl fmt::Display for MonitorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorPolicy::All => write!(f, "all"),
            MonitorPolicy::Last => write!(f, "last"),
            MonitorPolicy::Nothing => write!(f, "nothing"),
        }
    }
}

/// Which of a stage's submitted tasks are drawn, on top of the persistent ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualizePolicy {
    All,
    AllButLast,
}

impl VisualizePolicy {
    pub fn select(&self, persistent: &[TaskId], ids: &[TaskId]) -> Vec<TaskId> {
        let stage = match self {
            VisualizePolicy::All => ids,
            VisualizePolicy::AllButLast => &ids[..ids.len().saturating_sub(1)],
        };
        persistent.iter().chain(stage).copied().collect()
    }
}

impl fmt::Display for VisualizePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisualizePolicy::All => write!(f, "all"),
            VisualizePolicy::AllButLast => write!(f, "all_but_last"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    /// Query perception for a fresh grasp interval; keep the last one on failure.
    RefreshGrasp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    pub kind: StageKind,
    pub tolerances: Tolerances,
    pub stiffness: Option<Stiffness>,
    pub monitor: MonitorPolicy,
    pub visualize: VisualizePolicy,
    pub precondition: Option<Precondition>,
}

impl StageSpec {
    /// Built-in settings for a stage.
    pub fn default_for(kind: StageKind) -> Self {
        let base = Tolerances::default();
        let (error_tol, stiffness) = match kind {
            StageKind::SensingConfiguration => (1e-2, Stiffness::rigid()),
            StageKind::GraspApproach => (
                1e-3,
                Stiffness::new(1000.0, 1000.0, 100.0, 100.0, 100.0, 100.0),
            ),
            StageKind::ObjectExtract => (1e-2, Stiffness::rigid()),
            StageKind::ObjectTransfer => (1e-3, Stiffness::rigid()),
            StageKind::ObjectPlace => (
                1e-4,
                Stiffness::new(100.0, 1000.0, 1000.0, 100.0, 100.0, 100.0),
            ),
            StageKind::GripperExtract => (5e-3, Stiffness::rigid()),
            StageKind::TransferConfiguration => (1e-2, Stiffness::rigid()),
        };
        let (monitor, visualize) = if kind.is_joint_configuration() {
            (MonitorPolicy::Last, VisualizePolicy::AllButLast)
        } else {
            (MonitorPolicy::All, VisualizePolicy::All)
        };
        let precondition = match kind {
            StageKind::GraspApproach => Some(Precondition::RefreshGrasp),
            _ => None,
        };

        Self {
            kind,
            tolerances: base.with_error_tol(error_tol),
            stiffness: Some(stiffness),
            monitor,
            visualize,
            precondition,
        }
    }
}

/// One [`StageSpec`] per stage kind.
#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    specs: Vec<StageSpec>,
}

impl Default for StagePlan {
    fn default() -> Self {
        Self {
            specs: StageKind::ALL.into_iter().map(StageSpec::default_for).collect(),
        }
    }
}

impl StagePlan {
    pub fn spec(&self, kind: StageKind) -> &StageSpec {
        &self.specs[kind.index()]
    }

    pub fn spec_mut(&mut self, kind: StageKind) -> &mut StageSpec {
        &mut self.specs[kind.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageSpec> {
        self.specs.iter()
    }

    /// The stages a run executes for `zones` placement zones, assuming every
    /// grasp succeeds on the first attempt.
    pub fn pipeline(&self, zones: usize) -> Vec<(StageKind, Option<usize>)> {
        let mut order = Vec::new();
        for zone in 0..zones {
            for kind in &StageKind::ALL[..6] {
                order.push((*kind, Some(zone)));
            }
        }
        order.push((StageKind::TransferConfiguration, None));
        order
    }
}

/// What the geometry collaborator sees when building a stage's tasks.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub grasp: &'a GraspInterval,
    pub zone: Option<&'a PlaceZone>,
}
