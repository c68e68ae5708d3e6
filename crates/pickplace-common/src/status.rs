//! Progress feed messages published by the controller.

use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// Progress of one live task. Zero means the task is satisfied; the sign
/// carries the side of the constraint the task is on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: TaskId,
    pub name: String,
    pub progress: f64,
}

impl TaskStatus {
    pub fn new(id: impl Into<TaskId>, name: impl Into<String>, progress: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            progress,
        }
    }
}

/// One status message: every task currently known to the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusArray {
    pub statuses: Vec<TaskStatus>,
}

impl TaskStatusArray {
    pub fn new(statuses: Vec<TaskStatus>) -> Self {
        Self { statuses }
    }

    /// Convenience constructor from `(id, progress)` pairs, names left empty.
    pub fn from_pairs(pairs: &[(u32, f64)]) -> Self {
        Self {
            statuses: pairs
                .iter()
                .map(|&(id, progress)| TaskStatus::new(id, "", progress))
                .collect(),
        }
    }

    /// Progress reported for `id`, if the task is present in this message.
    pub fn progress_of(&self, id: TaskId) -> Option<f64> {
        self.statuses
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.progress)
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_of_present_and_absent() {
        let batch = TaskStatusArray::from_pairs(&[(7, 0.5), (9, -0.2)]);
        assert_eq!(batch.progress_of(TaskId(9)), Some(-0.2));
        assert_eq!(batch.progress_of(TaskId(8)), None);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_empty_batch() {
        let batch = TaskStatusArray::default();
        assert!(batch.is_empty());
        assert_eq!(batch.progress_of(TaskId(1)), None);
    }
}
