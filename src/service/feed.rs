use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use pickplace_common::TaskStatusArray;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::monitor::StageGate;

/// Pump a status feed into the gate until the feed ends.
///
/// Runs on its own task so the sample path never waits on the sequencer.
pub fn spawn_progress_feed(
    gate: Arc<StageGate>,
    mut feed: BoxStream<'static, TaskStatusArray>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(batch) = feed.next().await {
            gate.on_sample(&batch);
        }
        debug!("progress feed ended");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{StageOutcome, Tolerances};
    use pickplace_common::TaskId;

    #[tokio::test]
    async fn test_feed_drives_gate_to_outcome() {
        let gate = Arc::new(StageGate::new());
        {
            let mut state = gate.lock().await;
            gate.reset_outcome(&state);
            state.arm(vec![TaskId(2)], Tolerances::default().with_error_tol(0.01));
        }

        let batches = vec![
            TaskStatusArray::from_pairs(&[(2, 0.4)]),
            TaskStatusArray::from_pairs(&[(2, 0.1)]),
            TaskStatusArray::from_pairs(&[(2, 0.0)]),
        ];
        let feed = futures_util::stream::iter(batches).boxed();
        let handle = spawn_progress_feed(Arc::clone(&gate), feed);
        handle.await.unwrap();

        assert_eq!(gate.outcome(), StageOutcome::Converged);
        assert_eq!(gate.stats().received, 3);
    }
}
