use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::TaskState;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCounts {
    pub pending: usize,
    pub resolving: usize,
    pub converting: usize,
    pub completed: usize,
    pub partially_completed: usize,
    pub failed: usize,
}

impl RegistryCounts {
    pub fn add(&mut self, state: TaskState) {
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::Resolving => self.resolving += 1,
            TaskState::Converting => self.converting += 1,
            TaskState::Completed => self.completed += 1,
            TaskState::PartiallyCompleted => self.partially_completed += 1,
            TaskState::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.active() + self.completed + self.partially_completed + self.failed
    }

    /// Tasks not yet in a terminal state.
    pub fn active(&self) -> usize {
        self.pending + self.resolving + self.converting
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub active_tasks: usize,
    pub tasks: RegistryCounts,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn new(tasks: RegistryCounts, checked_at: DateTime<Utc>) -> Self {
        Self {
            status: "healthy".to_string(),
            active_tasks: tasks.active(),
            tasks,
            checked_at,
        }
    }
}
