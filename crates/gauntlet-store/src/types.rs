use anyhow::Result;
use async_trait::async_trait;

use gauntlet_common::{
    DeploymentRecord, DeploymentStatus, EvaluationTask, FileType, ModifiedFile, Project,
    SourceFile, VllmDeployment,
};

/// Outcome of a file upsert. The id is preserved across content changes so
/// user overrides keep pointing at the same original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(String),
    Updated(String),
    /// Same commit and content as the stored snapshot; nothing written.
    Unchanged(String),
}

impl UpsertOutcome {
    pub fn file_id(&self) -> &str {
        match self {
            UpsertOutcome::Created(id) | UpsertOutcome::Updated(id) | UpsertOutcome::Unchanged(id) => id,
        }
    }
}

/// One observed file from the source, as handed to `upsert_file`.
#[derive(Debug, Clone)]
pub struct NewFile<'a> {
    pub project_id: &'a str,
    pub path: &'a str,
    pub content: &'a str,
    pub file_type: FileType,
    pub source_commit: &'a str,
    pub observed_at_ms: u64,
}

/// A conditional status write. `from` guards the transition; `None` forces
/// the write regardless of the current status (used for delete).
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub from: Option<DeploymentStatus>,
    pub to: DeploymentStatus,
    pub last_error: Option<String>,
    pub failure_increment: bool,
    pub at_ms: u64,
}

/// The single logical database shared by every service.
///
/// Backed by Mongo in production and by an in-memory map in tests; the
/// conditional operations (`claim_task`, guarded status updates) are the
/// at-most-once anchors the schedulers rely on, so both backends implement
/// them with the same compare-and-set semantics.
#[async_trait]
pub trait Store: Send + Sync {
    /// Liveness probe backing `/health`.
    async fn ping(&self) -> Result<()>;

    // -- projects -----------------------------------------------------------

    async fn insert_project(&self, project: &Project) -> Result<()>;
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>>;
    async fn list_projects(&self) -> Result<Vec<Project>>;
    /// Full-document replace keyed by `project_id`. Returns false if absent.
    async fn update_project(&self, project: &Project) -> Result<bool>;
    /// Cascades to the project's files and modified files.
    async fn delete_project(&self, project_id: &str) -> Result<bool>;
    async fn touch_project_sync(&self, project_id: &str, at_ms: u64) -> Result<()>;

    // -- files --------------------------------------------------------------

    async fn upsert_file(&self, file: NewFile<'_>) -> Result<UpsertOutcome>;
    async fn get_file(&self, file_id: &str) -> Result<Option<SourceFile>>;
    async fn list_files(
        &self,
        project_id: &str,
        file_type: Option<FileType>,
        benchmark_type: Option<&str>,
    ) -> Result<Vec<SourceFile>>;
    /// Flags files of the project whose path is not in `observed_paths` as
    /// stale. Archive semantics: nothing is ever physically removed, and
    /// `upsert_file` clears the flag when the path reappears.
    async fn mark_unobserved_files_stale(
        &self,
        project_id: &str,
        observed_paths: &[String],
    ) -> Result<u64>;
    /// Explicit user delete (soft): stamps `deleted_at_ms` on the file and
    /// flags every override of it as orphaned. Sticky; the poller's
    /// re-observation path never clears it. Returns false if the file does
    /// not exist.
    async fn delete_file(&self, file_id: &str, at_ms: u64) -> Result<bool>;

    // -- modified files -----------------------------------------------------

    /// Returns false on a `(original_file_id, modified_name)` duplicate.
    async fn insert_modified_file(&self, file: &ModifiedFile) -> Result<bool>;
    async fn get_modified_file(&self, modified_file_id: &str) -> Result<Option<ModifiedFile>>;
    async fn list_modified_files(
        &self,
        project_id: &str,
        original_file_id: Option<&str>,
    ) -> Result<Vec<ModifiedFile>>;
    async fn update_modified_file(
        &self,
        modified_file_id: &str,
        content: &str,
        at_ms: u64,
    ) -> Result<bool>;
    async fn delete_modified_file(&self, modified_file_id: &str) -> Result<bool>;
    /// Deletes every override of the project. Returns the count removed.
    async fn reset_project_overrides(&self, project_id: &str) -> Result<u64>;

    // -- deployments --------------------------------------------------------

    async fn insert_deployment(&self, deployment: &DeploymentRecord) -> Result<()>;
    async fn get_deployment(&self, deployment_id: &str) -> Result<Option<DeploymentRecord>>;
    async fn list_deployments(
        &self,
        status: Option<DeploymentStatus>,
    ) -> Result<Vec<DeploymentRecord>>;
    /// Deployments the reconciler still owns (status not terminal).
    async fn list_open_deployments(&self) -> Result<Vec<DeploymentRecord>>;
    async fn update_deployment_status(
        &self,
        deployment_id: &str,
        update: StatusUpdate,
    ) -> Result<bool>;
    /// Marks every non-deleted deployment that submitted exactly this YAML
    /// in this namespace as deleted (the delete-by-manifest path).
    async fn mark_deployments_deleted_by_yaml(
        &self,
        namespace: &str,
        yaml: &str,
        at_ms: u64,
    ) -> Result<u64>;

    // -- vllm deployments ---------------------------------------------------

    async fn insert_vllm_deployment(&self, deployment: &VllmDeployment) -> Result<()>;
    async fn get_vllm_deployment(&self, deployment_id: &str) -> Result<Option<VllmDeployment>>;
    async fn list_vllm_deployments(&self) -> Result<Vec<VllmDeployment>>;
    /// Deployments with status in {pending, running}: the conflict set the
    /// placement engine admits against.
    async fn list_active_vllm_deployments(&self) -> Result<Vec<VllmDeployment>>;
    async fn update_vllm_status(&self, deployment_id: &str, update: StatusUpdate) -> Result<bool>;

    // -- evaluation tasks ---------------------------------------------------

    async fn insert_task(&self, task: &EvaluationTask) -> Result<()>;
    async fn get_task(&self, task_id: &str) -> Result<Option<EvaluationTask>>;
    async fn list_tasks(&self) -> Result<Vec<EvaluationTask>>;
    /// Tasks with `state = scheduled` and `scheduled_at_ms <= now_ms`.
    async fn due_tasks(&self, now_ms: u64) -> Result<Vec<EvaluationTask>>;
    /// Conditional `scheduled → firing`. At most one caller wins.
    async fn claim_task(&self, task_id: &str, at_ms: u64) -> Result<bool>;
    async fn complete_task(&self, task_id: &str, deployment_id: &str, at_ms: u64) -> Result<bool>;
    /// Conditional `firing → scheduled` with a new fire time and a bumped
    /// attempt counter.
    async fn reschedule_task(
        &self,
        task_id: &str,
        scheduled_at_ms: u64,
        error: &str,
        at_ms: u64,
    ) -> Result<bool>;
    async fn fail_task(&self, task_id: &str, error: &str, at_ms: u64) -> Result<bool>;
    /// Conditional `scheduled → cancelled`.
    async fn cancel_task(&self, task_id: &str, at_ms: u64) -> Result<bool>;
}
