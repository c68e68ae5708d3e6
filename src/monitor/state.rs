use pickplace_common::{TaskId, TaskStatusArray};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Thresholds a stage is judged against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    /// Largest absolute progress that still counts as converged.
    pub error_tol: f64,
    /// Largest inter-sample change that counts as "not moving".
    pub diff_tol: f64,
    /// How long progress may stay flat before the stage is forced to succeed.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Tolerances {
    pub fn new(error_tol: f64, diff_tol: f64, timeout: Duration) -> Self {
        Self {
            error_tol,
            diff_tol,
            timeout,
        }
    }

    pub fn with_error_tol(mut self, error_tol: f64) -> Self {
        self.error_tol = error_tol;
        self
    }
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            error_tol: 0.0,
            diff_tol: 1e-5,
            timeout: Duration::from_millis(500),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Decision for the active stage. Leaves `Pending` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Pending,
    Converged,
    /// Progress stopped changing for longer than the timeout. Counts as success.
    Stagnated,
}

impl StageOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageOutcome::Pending)
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOutcome::Pending => write!(f, "pending"),
            StageOutcome::Converged => write!(f, "converged"),
            StageOutcome::Stagnated => write!(f, "stagnated"),
        }
    }
}

/// Result of evaluating one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// No stage is armed.
    Idle,
    /// A monitored task was absent from the sample; nothing was updated.
    MissingFeedback(TaskId),
    Progressing { error: f64, diff: f64 },
    Stalling { error: f64, stalled_for: Duration },
    Converged { error: f64 },
    Stagnated { error: f64, stalled_for: Duration },
}

impl Verdict {
    /// The outcome this verdict decides, if any.
    pub fn outcome(&self) -> Option<StageOutcome> {
        match self {
            Verdict::Converged { .. } => Some(StageOutcome::Converged),
            Verdict::Stagnated { .. } => Some(StageOutcome::Stagnated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Generation {
    progress: Vec<f64>,
    at: Instant,
}

/// Per-stage monitor state: the monitored tasks, their tolerances, the
/// previous progress generation and the stagnation clock.
///
/// Only ever touched behind the gate's mutex.
#[derive(Debug, Default)]
pub struct MonitorState {
    monitored: Vec<TaskId>,
    tolerances: Tolerances,
    previous: Option<Generation>,
    stagnant_since: Option<Instant>,
    armed: bool,
}

impl MonitorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start judging a new stage. Drops any progress history.
    pub fn arm(&mut self, monitored: Vec<TaskId>, tolerances: Tolerances) {
        self.monitored = monitored;
        self.tolerances = tolerances;
        self.previous = None;
        self.stagnant_since = None;
        self.armed = true;
    }

    /// Stop judging samples; the monitored set is kept for inspection.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Forget the monitored set and all history.
    pub fn clear(&mut self) {
        self.monitored.clear();
        self.previous = None;
        self.stagnant_since = None;
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn monitored(&self) -> &[TaskId] {
        &self.monitored
    }

    pub fn tolerances(&self) -> Tolerances {
        self.tolerances
    }

    pub fn stagnant_since(&self) -> Option<Instant> {
        self.stagnant_since
    }

    /// Evaluate one status message taken at `now`.
    ///
    /// The error is the max-norm of the monitored progress values and the
    /// diff is the max-norm of their change since the previous generation.
    /// A stagnation episode is timed from the previous generation, the
    /// sample the first flat delta was measured against.
    pub fn evaluate(&mut self, batch: &TaskStatusArray, now: Instant) -> Verdict {
        if !self.armed {
            return Verdict::Idle;
        }

        let mut current = Vec::with_capacity(self.monitored.len());
        for id in &self.monitored {
            match batch.progress_of(*id) {
                Some(p) if p.is_finite() => current.push(p),
                Some(_) => current.push(f64::INFINITY),
                None => return Verdict::MissingFeedback(*id),
            }
        }

        let error = current.iter().fold(0.0_f64, |acc, p| acc.max(p.abs()));
        let diff = match &self.previous {
            Some(prev) if !current.is_empty() && prev.progress.len() == current.len() => current
                .iter()
                .zip(&prev.progress)
                .map(|(c, p)| {
                    let d = (c - p).abs();
                    if d.is_nan() { f64::INFINITY } else { d }
                })
                .fold(0.0_f64, f64::max),
            _ => f64::INFINITY,
        };
        let reference_at = self.previous.as_ref().map(|g| g.at);
        self.previous = Some(Generation {
            progress: current,
            at: now,
        });

        if error <= self.tolerances.error_tol {
            self.stagnant_since = None;
            return Verdict::Converged { error };
        }

        if diff <= self.tolerances.diff_tol {
            let since = *self
                .stagnant_since
                .get_or_insert(reference_at.unwrap_or(now));
            let stalled_for = now.saturating_duration_since(since);
            if stalled_for > self.tolerances.timeout {
                self.stagnant_since = None;
                return Verdict::Stagnated { error, stalled_for };
            }
            return Verdict::Stalling { error, stalled_for };
        }

        self.stagnant_since = None;
        Verdict::Progressing { error, diff }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, secs: f64) -> Instant {
        base + Duration::from_secs_f64(secs)
    }

    fn single(id: u32, progress: f64) -> TaskStatusArray {
        TaskStatusArray::from_pairs(&[(id, progress)])
    }

    #[test]
    fn test_tolerances_default() {
        let tol = Tolerances::default();
        assert_eq!(tol.error_tol, 0.0);
        assert_eq!(tol.diff_tol, 1e-5);
        assert_eq!(tol.timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_idle_until_armed() {
        let mut state = MonitorState::new();
        assert_eq!(state.evaluate(&single(7, 0.0), Instant::now()), Verdict::Idle);
    }

    #[test]
    fn test_converges_on_threshold_sample_not_before() {
        let base = Instant::now();
        let mut state = MonitorState::new();
        state.arm(
            vec![TaskId(7)],
            Tolerances::new(0.01, 1e-5, Duration::from_millis(500)),
        );

        assert!(matches!(
            state.evaluate(&single(7, 0.5), at(base, 0.0)),
            Verdict::Progressing { .. }
        ));
        match state.evaluate(&single(7, 0.3), at(base, 0.1)) {
            Verdict::Progressing { diff, .. } => assert!((diff - 0.2).abs() < 1e-12),
            other => panic!("Expected Progressing, got {:?}", other),
        }
        assert_eq!(
            state.evaluate(&single(7, 0.005), at(base, 0.2)),
            Verdict::Converged { error: 0.005 }
        );
    }

    #[test]
    fn test_stagnates_after_timeout_of_flat_progress() {
        let base = Instant::now();
        let mut state = MonitorState::new();
        state.arm(
            vec![TaskId(7)],
            Tolerances::new(0.001, 0.01, Duration::from_millis(200)),
        );

        assert!(matches!(
            state.evaluate(&single(7, 0.05), at(base, 0.0)),
            Verdict::Progressing { .. }
        ));
        assert!(matches!(
            state.evaluate(&single(7, 0.0499), at(base, 0.1)),
            Verdict::Stalling { .. }
        ));
        assert_eq!(state.stagnant_since(), Some(at(base, 0.0)));
        match state.evaluate(&single(7, 0.0499), at(base, 0.25)) {
            Verdict::Stagnated { stalled_for, .. } => {
                assert!(stalled_for > Duration::from_millis(200))
            }
            other => panic!("Expected Stagnated, got {:?}", other),
        }
    }

    #[test]
    fn test_progressing_sample_resets_stagnation_streak() {
        let base = Instant::now();
        let mut state = MonitorState::new();
        state.arm(
            vec![TaskId(1)],
            Tolerances::new(0.001, 0.01, Duration::from_millis(200)),
        );

        state.evaluate(&single(1, 0.5), at(base, 0.0));
        assert!(matches!(
            state.evaluate(&single(1, 0.5), at(base, 0.15)),
            Verdict::Stalling { .. }
        ));
        // a single moving sample breaks the streak
        assert!(matches!(
            state.evaluate(&single(1, 0.3), at(base, 0.18)),
            Verdict::Progressing { .. }
        ));
        assert_eq!(state.stagnant_since(), None);

        // the new streak is timed from 0.18, so 0.3 is still inside the window
        assert!(matches!(
            state.evaluate(&single(1, 0.3), at(base, 0.3)),
            Verdict::Stalling { .. }
        ));
        assert!(matches!(
            state.evaluate(&single(1, 0.3), at(base, 0.39)),
            Verdict::Stagnated { .. }
        ));
    }

    #[test]
    fn test_missing_feedback_leaves_state_untouched() {
        let base = Instant::now();
        let mut state = MonitorState::new();
        state.arm(
            vec![TaskId(1), TaskId(2)],
            Tolerances::new(0.01, 0.01, Duration::from_millis(200)),
        );

        state.evaluate(
            &TaskStatusArray::from_pairs(&[(1, 0.5), (2, 0.5)]),
            at(base, 0.0),
        );
        assert_eq!(
            state.evaluate(&TaskStatusArray::from_pairs(&[(1, 0.0)]), at(base, 0.1)),
            Verdict::MissingFeedback(TaskId(2))
        );
        // the previous generation is still the t=0 one
        match state.evaluate(
            &TaskStatusArray::from_pairs(&[(1, 0.4), (2, 0.5)]),
            at(base, 0.2),
        ) {
            Verdict::Progressing { diff, .. } => assert!((diff - 0.1).abs() < 1e-12),
            other => panic!("Expected Progressing, got {:?}", other),
        }
    }

    #[test]
    fn test_unmonitored_tasks_are_ignored() {
        let mut state = MonitorState::new();
        state.arm(vec![TaskId(3)], Tolerances::default().with_error_tol(0.01));
        let batch = TaskStatusArray::from_pairs(&[(1, 5.0), (3, 0.001), (9, -4.0)]);
        assert_eq!(
            state.evaluate(&batch, Instant::now()),
            Verdict::Converged { error: 0.001 }
        );
    }

    #[test]
    fn test_error_is_max_norm_of_signed_progress() {
        let mut state = MonitorState::new();
        state.arm(vec![TaskId(1), TaskId(2)], Tolerances::default());
        let batch = TaskStatusArray::from_pairs(&[(1, 0.1), (2, -0.4)]);
        match state.evaluate(&batch, Instant::now()) {
            Verdict::Progressing { error, .. } => assert_eq!(error, 0.4),
            other => panic!("Expected Progressing, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_monitored_set_converges_immediately() {
        let mut state = MonitorState::new();
        state.arm(Vec::new(), Tolerances::default());
        assert_eq!(
            state.evaluate(&TaskStatusArray::default(), Instant::now()),
            Verdict::Converged { error: 0.0 }
        );
    }

    #[test]
    fn test_non_finite_progress_never_converges_or_stagnates() {
        let base = Instant::now();
        let mut state = MonitorState::new();
        state.arm(
            vec![TaskId(1)],
            Tolerances::new(1.0, 1.0, Duration::from_millis(10)),
        );
        for i in 0..5 {
            let verdict = state.evaluate(&single(1, f64::NAN), at(base, i as f64 * 0.1));
            assert!(
                matches!(verdict, Verdict::Progressing { .. }),
                "sample {} gave {:?}",
                i,
                verdict
            );
        }
    }

    #[test]
    fn test_arm_resets_history() {
        let base = Instant::now();
        let mut state = MonitorState::new();
        state.arm(
            vec![TaskId(1)],
            Tolerances::new(0.001, 0.01, Duration::from_millis(200)),
        );
        state.evaluate(&single(1, 0.5), at(base, 0.0));
        state.evaluate(&single(1, 0.5), at(base, 0.1));
        assert!(state.stagnant_since().is_some());

        state.arm(
            vec![TaskId(1)],
            Tolerances::new(0.001, 0.01, Duration::from_millis(200)),
        );
        assert!(state.stagnant_since().is_none());
        assert!(matches!(
            state.evaluate(&single(1, 0.5), at(base, 0.4)),
            Verdict::Progressing { .. }
        ));
    }

    #[test]
    fn test_clear_disarms_and_forgets_monitored_set() {
        let mut state = MonitorState::new();
        state.arm(vec![TaskId(4)], Tolerances::default());
        state.clear();
        assert!(!state.is_armed());
        assert!(state.monitored().is_empty());
    }

    #[test]
    fn test_tolerances_serialize_timeout_as_seconds() {
        let tol = Tolerances::new(1e-3, 1e-5, Duration::from_millis(250));
        let json = serde_json::to_value(tol).unwrap();
        assert_eq!(json["timeout"], 0.25);
    }
}
