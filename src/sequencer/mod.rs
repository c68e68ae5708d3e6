//! Stage sequencer.
//!
//! A strict linear pipeline of [`StageSpec`]s executed by one generic runner,
//! with the grasp as its only retry loop and [`safe_shutdown`] as the single
//! exit for every fatal failure.

pub mod report;
pub mod runner;
pub mod shutdown;
pub mod stage;

pub use report::{RunSummary, SequenceEvent, StageRecord};
pub use runner::{Sequencer, SequencerSettings};
pub use shutdown::{ShutdownReport, safe_shutdown};
pub use stage::{
    MonitorPolicy, Precondition, StageContext, StageKind, StagePlan, StageSpec, VisualizePolicy,
};
