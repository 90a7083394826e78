//! Task state machine.

use serde::{Deserialize, Serialize};

/// Task state.
///
/// State transitions:
/// - Pending -> Resolving -> Converting -> Completed
/// - Pending -> Resolving -> Converting -> PartiallyCompleted
/// - Pending -> Resolving -> Converting -> Failed (every format failed)
/// - Pending -> Resolving -> Failed (metadata resolution gave up)
///
/// Terminal states never move again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, worker not started yet.
    Pending,

    /// Fetching media info.
    Resolving,

    /// Producing the requested formats one after another.
    Converting,

    /// Every requested format was produced.
    Completed,

    /// Some formats were produced, some failed.
    PartiallyCompleted,

    /// Nothing was produced.
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::PartiallyCompleted | TaskState::Failed
        )
    }

    /// Is `next` a legal successor of `self`?
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Resolving)
                | (Resolving, Converting)
                | (Resolving, Failed)
                | (Converting, Completed)
                | (Converting, PartiallyCompleted)
                | (Converting, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Resolving => "resolving",
            TaskState::Converting => "converting",
            TaskState::Completed => "completed",
            TaskState::PartiallyCompleted => "partially_completed",
            TaskState::Failed => "failed",
        }
    }
}
