use pickplace_common::TaskStatusArray;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, info, trace, warn};

use super::state::{MonitorState, StageOutcome, Verdict};
use crate::errors::WaitError;

/// What happened to one incoming sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleDisposition {
    /// The gate was locked by a stage transition or another sample; dropped.
    Busy,
    /// The active stage already has its outcome; ignored.
    Settled,
    Evaluated(Verdict),
}

/// Sample counters, cumulative over the life of the gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStats {
    pub received: u64,
    pub dropped_busy: u64,
    pub evaluated: u64,
    pub missing_feedback: u64,
    pub signals: u64,
}

impl GateStats {
    /// Counts accumulated since an earlier snapshot.
    pub fn since(&self, earlier: &GateStats) -> GateStats {
        GateStats {
            received: self.received.saturating_sub(earlier.received),
            dropped_busy: self.dropped_busy.saturating_sub(earlier.dropped_busy),
            evaluated: self.evaluated.saturating_sub(earlier.evaluated),
            missing_feedback: self
                .missing_feedback
                .saturating_sub(earlier.missing_feedback),
            signals: self.signals.saturating_sub(earlier.signals),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    dropped_busy: AtomicU64,
    evaluated: AtomicU64,
    missing_feedback: AtomicU64,
    signals: AtomicU64,
}

/// Hand-off point between the progress feed and the sequencer.
///
/// The sample path only ever `try_lock`s the state and drops the sample when
/// the lock is taken. The sequencer holds the lock for the whole stage setup,
/// releases it while waiting for the outcome, and takes it back on wake.
/// The outcome channel is only written while the lock is held, and leaves
/// `Pending` at most once per stage.
#[derive(Debug)]
pub struct StageGate {
    state: Mutex<MonitorState>,
    outcome: watch::Sender<StageOutcome>,
    counters: Counters,
}

impl Default for StageGate {
    fn default() -> Self {
        Self::new()
    }
}

impl StageGate {
    pub fn new() -> Self {
        let (outcome, _) = watch::channel(StageOutcome::Pending);
        Self {
            state: Mutex::new(MonitorState::new()),
            outcome,
            counters: Counters::default(),
        }
    }

    /// Take the gate for a stage transition. Samples arriving meanwhile are dropped.
    pub async fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().await
    }

    /// Current outcome of the active stage.
    pub fn outcome(&self) -> StageOutcome {
        *self.outcome.borrow()
    }

    /// Put the outcome back to `Pending` for a new stage. Requires the lock.
    pub fn reset_outcome(&self, _state: &MutexGuard<'_, MonitorState>) {
        self.outcome.send_replace(StageOutcome::Pending);
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            received: self.counters.received.load(Ordering::Relaxed),
            dropped_busy: self.counters.dropped_busy.load(Ordering::Relaxed),
            evaluated: self.counters.evaluated.load(Ordering::Relaxed),
            missing_feedback: self.counters.missing_feedback.load(Ordering::Relaxed),
            signals: self.counters.signals.load(Ordering::Relaxed),
        }
    }

    pub fn on_sample(&self, batch: &TaskStatusArray) -> SampleDisposition {
        self.on_sample_at(batch, Instant::now())
    }

    /// Feed one status message observed at `now`. Never blocks.
    pub fn on_sample_at(&self, batch: &TaskStatusArray, now: Instant) -> SampleDisposition {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let Ok(mut state) = self.state.try_lock() else {
            self.counters.dropped_busy.fetch_add(1, Ordering::Relaxed);
            trace!("gate busy, dropping sample");
            return SampleDisposition::Busy;
        };

        if self.outcome().is_terminal() {
            return SampleDisposition::Settled;
        }

        let verdict = state.evaluate(batch, now);
        if !matches!(verdict, Verdict::Idle) {
            self.counters.evaluated.fetch_add(1, Ordering::Relaxed);
        }

        match verdict {
            Verdict::MissingFeedback(id) => {
                self.counters.missing_feedback.fetch_add(1, Ordering::Relaxed);
                warn!(task = %id, "No status feedback for monitored task");
            }
            Verdict::Stalling { error, stalled_for } => {
                debug!(
                    error,
                    stalled_ms = u64::try_from(stalled_for.as_millis()).unwrap_or(u64::MAX),
                    "Task progress stagnating"
                );
            }
            Verdict::Converged { error } => {
                if self.signal(StageOutcome::Converged) {
                    info!(
                        error,
                        monitored = ?state.monitored(),
                        "Monitored tasks converged"
                    );
                }
            }
            Verdict::Stagnated { error, stalled_for } => {
                if self.signal(StageOutcome::Stagnated) {
                    warn!(
                        error,
                        stalled_ms = u64::try_from(stalled_for.as_millis()).unwrap_or(u64::MAX),
                        monitored = ?state.monitored(),
                        "Task execution timeout, accepting stagnated progress"
                    );
                }
            }
            Verdict::Progressing { error, diff } => {
                trace!(error, diff, "Task progressing");
            }
            Verdict::Idle => {}
        }

        SampleDisposition::Evaluated(verdict)
    }

    fn signal(&self, outcome: StageOutcome) -> bool {
        let sent = self.outcome.send_if_modified(|current| {
            if *current == StageOutcome::Pending {
                *current = outcome;
                true
            } else {
                false
            }
        });
        if sent {
            self.counters.signals.fetch_add(1, Ordering::Relaxed);
        }
        sent
    }

    /// Release the lock and wait until the active stage has an outcome, then
    /// take the lock back.
    ///
    /// With a `deadline`, gives up once it elapses. The lock is not re-taken
    /// on error.
    pub async fn wait_outcome<'a>(
        &'a self,
        state: MutexGuard<'a, MonitorState>,
        deadline: Option<Duration>,
    ) -> Result<(StageOutcome, MutexGuard<'a, MonitorState>), WaitError> {
        let mut rx = self.outcome.subscribe();
        drop(state);

        let outcome = {
            let wait = rx.wait_for(StageOutcome::is_terminal);
            let result = match deadline {
                Some(limit) => tokio::time::timeout(limit, wait)
                    .await
                    .map_err(|_| WaitError::Deadline(limit))?,
                None => wait.await,
            };
            match result {
                Ok(value) => *value,
                Err(_) => return Err(WaitError::Closed),
            }
        };

        let state = self.state.lock().await;
        Ok((outcome, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::Tolerances;
    use pickplace_common::TaskId;
    use std::sync::Arc;

    fn single(id: u32, progress: f64) -> TaskStatusArray {
        TaskStatusArray::from_pairs(&[(id, progress)])
    }

    async fn armed_gate(monitored: Vec<TaskId>, tolerances: Tolerances) -> StageGate {
        let gate = StageGate::new();
        {
            let mut state = gate.lock().await;
            gate.reset_outcome(&state);
            state.arm(monitored, tolerances);
        }
        gate
    }

    #[tokio::test]
    async fn test_busy_gate_drops_sample() {
        let gate = armed_gate(vec![TaskId(1)], Tolerances::default().with_error_tol(0.1)).await;
        let guard = gate.lock().await;

        assert_eq!(gate.on_sample(&single(1, 0.0)), SampleDisposition::Busy);
        assert_eq!(gate.outcome(), StageOutcome::Pending);
        drop(guard);

        let stats = gate.stats();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.dropped_busy, 1);
        assert_eq!(stats.evaluated, 0);
    }

    #[tokio::test]
    async fn test_idle_gate_ignores_samples() {
        let gate = StageGate::new();
        assert_eq!(
            gate.on_sample(&single(1, 0.0)),
            SampleDisposition::Evaluated(Verdict::Idle)
        );
        assert_eq!(gate.outcome(), StageOutcome::Pending);
        assert_eq!(gate.stats().evaluated, 0);
    }

    #[tokio::test]
    async fn test_signals_exactly_once_per_stage() {
        let gate = armed_gate(vec![TaskId(1)], Tolerances::default().with_error_tol(0.1)).await;

        assert!(matches!(
            gate.on_sample(&single(1, 0.05)),
            SampleDisposition::Evaluated(Verdict::Converged { .. })
        ));
        assert_eq!(gate.outcome(), StageOutcome::Converged);
        for _ in 0..5 {
            assert_eq!(gate.on_sample(&single(1, 0.0)), SampleDisposition::Settled);
        }
        assert_eq!(gate.stats().signals, 1);
    }

    #[tokio::test]
    async fn test_stagnation_signals_exactly_once() {
        let tolerances = Tolerances {
            error_tol: 0.01,
            diff_tol: 1e-5,
            timeout: Duration::from_millis(200),
        };
        let gate = armed_gate(vec![TaskId(1)], tolerances).await;
        let base = Instant::now();
        let at = |ms: u64| base + Duration::from_millis(ms);

        assert!(matches!(
            gate.on_sample_at(&single(1, 0.0499), at(0)),
            SampleDisposition::Evaluated(Verdict::Progressing { .. })
        ));
        assert!(matches!(
            gate.on_sample_at(&single(1, 0.0499), at(100)),
            SampleDisposition::Evaluated(Verdict::Stalling { .. })
        ));
        assert!(matches!(
            gate.on_sample_at(&single(1, 0.0499), at(250)),
            SampleDisposition::Evaluated(Verdict::Stagnated { .. })
        ));
        assert_eq!(gate.outcome(), StageOutcome::Stagnated);

        // flat for well past a second timeout window
        for i in 1..=10 {
            assert_eq!(
                gate.on_sample_at(&single(1, 0.0499), at(250 + 50 * i)),
                SampleDisposition::Settled
            );
        }
        assert_eq!(gate.stats().signals, 1);
        assert_eq!(gate.outcome(), StageOutcome::Stagnated);
    }

    #[tokio::test]
    async fn test_missing_feedback_never_decides() {
        let gate = armed_gate(
            vec![TaskId(1), TaskId(2)],
            Tolerances::default().with_error_tol(1.0),
        )
        .await;
        for _ in 0..3 {
            assert_eq!(
                gate.on_sample(&single(1, 0.0)),
                SampleDisposition::Evaluated(Verdict::MissingFeedback(TaskId(2)))
            );
        }
        assert_eq!(gate.outcome(), StageOutcome::Pending);
        assert_eq!(gate.stats().missing_feedback, 3);
    }

    #[tokio::test]
    async fn test_reset_outcome_rearms_signal() {
        let gate = armed_gate(Vec::new(), Tolerances::default()).await;
        gate.on_sample(&TaskStatusArray::default());
        assert_eq!(gate.outcome(), StageOutcome::Converged);

        {
            let mut state = gate.lock().await;
            gate.reset_outcome(&state);
            state.arm(Vec::new(), Tolerances::default());
        }
        assert_eq!(gate.outcome(), StageOutcome::Pending);
        gate.on_sample(&TaskStatusArray::default());
        assert_eq!(gate.outcome(), StageOutcome::Converged);
        assert_eq!(gate.stats().signals, 2);
    }

    #[tokio::test]
    async fn test_wait_outcome_wakes_on_signal() {
        let gate = Arc::new(
            armed_gate(vec![TaskId(5)], Tolerances::default().with_error_tol(0.01)).await,
        );

        let feeder = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                for progress in [0.5, 0.2, 0.05, 0.001, 0.0] {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    gate.on_sample(&single(5, progress));
                }
            })
        };

        let guard = gate.lock().await;
        let (outcome, guard) = gate
            .wait_outcome(guard, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(outcome, StageOutcome::Converged);
        assert_eq!(guard.monitored(), &[TaskId(5)]);
        drop(guard);
        feeder.await.unwrap();
        assert_eq!(gate.stats().signals, 1);
    }

    #[tokio::test]
    async fn test_wait_outcome_returns_immediately_when_already_decided() {
        let gate = armed_gate(Vec::new(), Tolerances::default()).await;
        gate.on_sample(&TaskStatusArray::default());

        let guard = gate.lock().await;
        let (outcome, _guard) = gate.wait_outcome(guard, None).await.unwrap();
        assert_eq!(outcome, StageOutcome::Converged);
    }

    #[tokio::test]
    async fn test_wait_outcome_deadline() {
        let gate = armed_gate(vec![TaskId(1)], Tolerances::default()).await;
        let guard = gate.lock().await;
        let err = gate
            .wait_outcome(guard, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert_eq!(err, WaitError::Deadline(Duration::from_millis(20)));
        // the lock was released
        assert!(gate.state.try_lock().is_ok());
    }

    #[test]
    fn test_stats_since() {
        let earlier = GateStats {
            received: 10,
            dropped_busy: 2,
            evaluated: 8,
            missing_feedback: 1,
            signals: 1,
        };
        let later = GateStats {
            received: 25,
            dropped_busy: 3,
            evaluated: 22,
            missing_feedback: 1,
            signals: 2,
        };
        let delta = later.since(&earlier);
        assert_eq!(delta.received, 15);
        assert_eq!(delta.dropped_busy, 1);
        assert_eq!(delta.evaluated, 14);
        assert_eq!(delta.missing_feedback, 0);
        assert_eq!(delta.signals, 1);
    }
}
