use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Scheduled,
    Firing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// A deferred, possibly retried request to run a benchmark.
///
/// The `scheduled → firing` transition is a conditional write in the
/// store; it is the at-most-once anchor, so a restarted sweeper can never
/// fire the same task twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationTask {
    pub task_id: String,
    pub project_id: String,
    pub benchmark_type: String,
    pub job_file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file_id: Option<String>,
    pub model_endpoint: String,
    pub name: String,
    pub scheduled_at_ms: u64,
    pub state: TaskState,
    #[serde(default)]
    pub attempts: u32,
    pub max_attempts: u32,
    /// Deployment created by a successful firing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Scheduled.is_terminal());
        assert!(!TaskState::Firing.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }
}
