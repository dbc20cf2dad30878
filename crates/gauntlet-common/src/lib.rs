pub mod deployment;
pub mod error;
pub mod project;
pub mod retry;
pub mod task;
pub mod terminal;
pub mod vllm;

pub use deployment::{AppliedResource, DeploymentRecord, DeploymentStatus, ResourceKind};
pub use error::ErrorKind;
pub use project::{FileType, ModifiedFile, Project, SourceFile};
pub use retry::backoff_with_jitter;
pub use task::{EvaluationTask, TaskState};
pub use terminal::{ClientFrame, ServerFrame};
pub use vllm::{ArgValue, ConfigFingerprint, VllmConfig, VllmDeployment};

pub mod telemetry;

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
