//! Convergence monitor.
//!
//! Reduces an asynchronous stream of per-task progress samples to one
//! stage decision. [`MonitorState`] holds the pure evaluation logic and
//! [`StageGate`] wraps it with the lock and the signal-once outcome latch the
//! sequencer waits on.
//!
//! | Type              | Role                                               |
//! |-------------------|----------------------------------------------------|
//! | `Tolerances`      | error / diff / timeout thresholds for a stage      |
//! | `MonitorState`    | monitored ids, previous progress, stagnation clock |
//! | `Verdict`         | result of evaluating one sample                    |
//! | `StageGate`       | busy-drop sample entry, outcome latch, counters    |

pub mod gate;
pub mod state;

pub use gate::{GateStats, SampleDisposition, StageGate};
pub use state::{MonitorState, StageOutcome, Tolerances, Verdict};
