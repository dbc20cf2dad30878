use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use gauntlet_common::{
    DeploymentRecord, DeploymentStatus, EvaluationTask, FileType, ModifiedFile, Project,
    SourceFile, TaskState, VllmDeployment,
};

use crate::types::{NewFile, StatusUpdate, Store, UpsertOutcome};

/// In-memory [`Store`] with the same conditional-write semantics as the
/// Mongo backend. The unit-test vehicle for every scheduler and the
/// placement engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    projects: BTreeMap<String, Project>,
    files: BTreeMap<String, SourceFile>,
    modified_files: BTreeMap<String, ModifiedFile>,
    deployments: BTreeMap<String, DeploymentRecord>,
    vllm_deployments: BTreeMap<String, VllmDeployment>,
    tasks: BTreeMap<String, EvaluationTask>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_status(
    status: &mut DeploymentStatus,
    failure_count: &mut u32,
    updated_at_ms: &mut u64,
    last_error: &mut Option<String>,
    update: &StatusUpdate,
) -> bool {
    if let Some(from) = update.from {
        if *status != from {
            return false;
        }
    }
    *status = update.to;
    *updated_at_ms = update.at_ms;
    if update.failure_increment {
        *failure_count += 1;
    }
    if let Some(err) = &update.last_error {
        *last_error = Some(err.clone());
    }
    true
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    // -- projects -----------------------------------------------------------

    async fn insert_project(&self, project: &Project) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .projects
            .insert(project.project_id.clone(), project.clone());
        Ok(())
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        Ok(self.inner.read().await.projects.get(project_id).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.inner.read().await.projects.values().cloned().collect())
    }

    async fn update_project(&self, project: &Project) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.projects.get_mut(&project.project_id) {
            Some(slot) => {
                *slot = project.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_project(&self, project_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        inner.files.retain(|_, f| f.project_id != project_id);
        inner
            .modified_files
            .retain(|_, f| f.project_id != project_id);
        Ok(inner.projects.remove(project_id).is_some())
    }

    async fn touch_project_sync(&self, project_id: &str, at_ms: u64) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(p) = inner.projects.get_mut(project_id) {
            p.last_sync_ms = Some(at_ms);
        }
        Ok(())
    }

    // -- files --------------------------------------------------------------

    async fn upsert_file(&self, file: NewFile<'_>) -> Result<UpsertOutcome> {
        let mut inner = self.inner.write().await;
        let existing = inner
            .files
            .values_mut()
            .find(|f| f.project_id == file.project_id && f.path == file.path);

        if let Some(existing) = existing {
            if existing.source_commit == file.source_commit
                && existing.content == file.content
                && !existing.stale
            {
                return Ok(UpsertOutcome::Unchanged(existing.file_id.clone()));
            }
            // Re-observation clears staleness but never touches
            // deleted_at_ms; an explicit delete survives re-polls.
            existing.content = file.content.to_string();
            existing.source_commit = file.source_commit.to_string();
            existing.last_observed_at_ms = file.observed_at_ms;
            existing.stale = false;
            return Ok(UpsertOutcome::Updated(existing.file_id.clone()));
        }

        let (benchmark_type, name) = SourceFile::split_path(file.path);
        let doc = SourceFile {
            file_id: uuid::Uuid::new_v4().to_string(),
            project_id: file.project_id.to_string(),
            path: file.path.to_string(),
            name,
            content: file.content.to_string(),
            file_type: file.file_type,
            benchmark_type,
            source_commit: file.source_commit.to_string(),
            last_observed_at_ms: file.observed_at_ms,
            stale: false,
            deleted_at_ms: None,
        };
        let id = doc.file_id.clone();
        inner.files.insert(id.clone(), doc);
        Ok(UpsertOutcome::Created(id))
    }

    async fn get_file(&self, file_id: &str) -> Result<Option<SourceFile>> {
        Ok(self.inner.read().await.files.get(file_id).cloned())
    }

    async fn list_files(
        &self,
        project_id: &str,
        file_type: Option<FileType>,
        benchmark_type: Option<&str>,
    ) -> Result<Vec<SourceFile>> {
        let inner = self.inner.read().await;
        let mut out: Vec<SourceFile> = inner
            .files
            .values()
            .filter(|f| f.project_id == project_id)
            .filter(|f| file_type.map_or(true, |ft| f.file_type == ft))
            .filter(|f| benchmark_type.map_or(true, |bt| f.benchmark_type == bt))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn mark_unobserved_files_stale(
        &self,
        project_id: &str,
        observed_paths: &[String],
    ) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let mut count = 0;
        for f in inner.files.values_mut() {
            if f.project_id == project_id
                && !f.stale
                && !observed_paths.iter().any(|p| p == &f.path)
            {
                f.stale = true;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_file(&self, file_id: &str, at_ms: u64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(f) = inner.files.get_mut(file_id) else {
            return Ok(false);
        };
        f.deleted_at_ms = Some(at_ms);
        for m in inner.modified_files.values_mut() {
            if m.original_file_id == file_id {
                m.orphaned = true;
            }
        }
        Ok(true)
    }

    // -- modified files -----------------------------------------------------

    async fn insert_modified_file(&self, file: &ModifiedFile) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let dup = inner.modified_files.values().any(|f| {
            f.original_file_id == file.original_file_id && f.modified_name == file.modified_name
        });
        if dup {
            return Ok(false);
        }
        inner
            .modified_files
            .insert(file.modified_file_id.clone(), file.clone());
        Ok(true)
    }

    async fn get_modified_file(&self, modified_file_id: &str) -> Result<Option<ModifiedFile>> {
        Ok(self
            .inner
            .read()
            .await
            .modified_files
            .get(modified_file_id)
            .cloned())
    }

    async fn list_modified_files(
        &self,
        project_id: &str,
        original_file_id: Option<&str>,
    ) -> Result<Vec<ModifiedFile>> {
        let inner = self.inner.read().await;
        let mut out: Vec<ModifiedFile> = inner
            .modified_files
            .values()
            .filter(|f| f.project_id == project_id)
            .filter(|f| original_file_id.map_or(true, |id| f.original_file_id == id))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.modified_name.cmp(&b.modified_name));
        Ok(out)
    }

    async fn update_modified_file(
        &self,
        modified_file_id: &str,
        content: &str,
        at_ms: u64,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.modified_files.get_mut(modified_file_id) {
            Some(f) => {
                f.content = content.to_string();
                f.updated_at_ms = at_ms;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_modified_file(&self, modified_file_id: &str) -> Result<bool> {
        Ok(self
            .inner
            .write()
            .await
            .modified_files
            .remove(modified_file_id)
            .is_some())
    }

    async fn reset_project_overrides(&self, project_id: &str) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.modified_files.len();
        inner
            .modified_files
            .retain(|_, f| f.project_id != project_id);
        Ok((before - inner.modified_files.len()) as u64)
    }

    // -- deployments --------------------------------------------------------

    async fn insert_deployment(&self, deployment: &DeploymentRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .deployments
            .insert(deployment.deployment_id.clone(), deployment.clone());
        Ok(())
    }

    async fn get_deployment(&self, deployment_id: &str) -> Result<Option<DeploymentRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .deployments
            .get(deployment_id)
            .cloned())
    }

    async fn list_deployments(
        &self,
        status: Option<DeploymentStatus>,
    ) -> Result<Vec<DeploymentRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .deployments
            .values()
            .filter(|d| status.map_or(true, |s| d.status == s))
            .cloned()
            .collect())
    }

    async fn list_open_deployments(&self) -> Result<Vec<DeploymentRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .deployments
            .values()
            .filter(|d| {
                matches!(
                    d.status,
                    DeploymentStatus::Pending | DeploymentStatus::Running
                )
            })
            .cloned()
            .collect())
    }

    async fn update_deployment_status(
        &self,
        deployment_id: &str,
        update: StatusUpdate,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.deployments.get_mut(deployment_id) {
            Some(d) => Ok(apply_status(
                &mut d.status,
                &mut d.failure_count,
                &mut d.updated_at_ms,
                &mut d.last_error,
                &update,
            )),
            None => Ok(false),
        }
    }

    async fn mark_deployments_deleted_by_yaml(
        &self,
        namespace: &str,
        yaml: &str,
        at_ms: u64,
    ) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let mut count = 0;
        for d in inner.deployments.values_mut() {
            if d.namespace == namespace
                && d.yaml_content == yaml
                && d.status != DeploymentStatus::Deleted
            {
                d.status = DeploymentStatus::Deleted;
                d.updated_at_ms = at_ms;
                count += 1;
            }
        }
        Ok(count)
    }

    // -- vllm deployments ---------------------------------------------------

    async fn insert_vllm_deployment(&self, deployment: &VllmDeployment) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .vllm_deployments
            .insert(deployment.deployment_id.clone(), deployment.clone());
        Ok(())
    }

    async fn get_vllm_deployment(&self, deployment_id: &str) -> Result<Option<VllmDeployment>> {
        Ok(self
            .inner
            .read()
            .await
            .vllm_deployments
            .get(deployment_id)
            .cloned())
    }

    async fn list_vllm_deployments(&self) -> Result<Vec<VllmDeployment>> {
        Ok(self
            .inner
            .read()
            .await
            .vllm_deployments
            .values()
            .cloned()
            .collect())
    }

    async fn list_active_vllm_deployments(&self) -> Result<Vec<VllmDeployment>> {
        let inner = self.inner.read().await;
        Ok(inner
            .vllm_deployments
            .values()
            .filter(|d| {
                matches!(
                    d.status,
                    DeploymentStatus::Pending | DeploymentStatus::Running
                )
            })
            .cloned()
            .collect())
    }

    async fn update_vllm_status(&self, deployment_id: &str, update: StatusUpdate) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.vllm_deployments.get_mut(deployment_id) {
            Some(d) => Ok(apply_status(
                &mut d.status,
                &mut d.failure_count,
                &mut d.updated_at_ms,
                &mut d.last_error,
                &update,
            )),
            None => Ok(false),
        }
    }

    // -- evaluation tasks ---------------------------------------------------

    async fn insert_task(&self, task: &EvaluationTask) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.tasks.insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<EvaluationTask>> {
        Ok(self.inner.read().await.tasks.get(task_id).cloned())
    }

    async fn list_tasks(&self) -> Result<Vec<EvaluationTask>> {
        Ok(self.inner.read().await.tasks.values().cloned().collect())
    }

    async fn due_tasks(&self, now_ms: u64) -> Result<Vec<EvaluationTask>> {
        let inner = self.inner.read().await;
        let mut out: Vec<EvaluationTask> = inner
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Scheduled && t.scheduled_at_ms <= now_ms)
            .cloned()
            .collect();
        out.sort_by_key(|t| t.scheduled_at_ms);
        Ok(out)
    }

    async fn claim_task(&self, task_id: &str, at_ms: u64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.tasks.get_mut(task_id) {
            Some(t) if t.state == TaskState::Scheduled => {
                t.state = TaskState::Firing;
                t.updated_at_ms = at_ms;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_task(&self, task_id: &str, deployment_id: &str, at_ms: u64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.tasks.get_mut(task_id) {
            Some(t) if t.state == TaskState::Firing => {
                t.state = TaskState::Completed;
                t.deployment_id = Some(deployment_id.to_string());
                t.updated_at_ms = at_ms;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reschedule_task(
        &self,
        task_id: &str,
        scheduled_at_ms: u64,
        error: &str,
        at_ms: u64,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.tasks.get_mut(task_id) {
            Some(t) if t.state == TaskState::Firing => {
                t.state = TaskState::Scheduled;
                t.scheduled_at_ms = scheduled_at_ms;
                t.attempts += 1;
                t.last_error = Some(error.to_string());
                t.updated_at_ms = at_ms;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_task(&self, task_id: &str, error: &str, at_ms: u64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.tasks.get_mut(task_id) {
            Some(t) if t.state == TaskState::Firing => {
                t.state = TaskState::Failed;
                t.attempts += 1;
                t.last_error = Some(error.to_string());
                t.updated_at_ms = at_ms;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_task(&self, task_id: &str, at_ms: u64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.tasks.get_mut(task_id) {
            Some(t) if t.state == TaskState::Scheduled => {
                t.state = TaskState::Cancelled;
                t.updated_at_ms = at_ms;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_common::now_ms;

    fn new_file<'a>(project: &'a str, path: &'a str, content: &'a str, commit: &'a str) -> NewFile<'a> {
        NewFile {
            project_id: project,
            path,
            content,
            file_type: FileType::Job,
            source_commit: commit,
            observed_at_ms: now_ms(),
        }
    }

    fn make_task(id: &str, scheduled_at_ms: u64) -> EvaluationTask {
        EvaluationTask {
            task_id: id.to_string(),
            project_id: "p1".to_string(),
            benchmark_type: "mmlu".to_string(),
            job_file_id: "f1".to_string(),
            config_file_id: None,
            model_endpoint: "http://svc:8000".to_string(),
            name: "run".to_string(),
            scheduled_at_ms,
            state: TaskState::Scheduled,
            attempts: 0,
            max_attempts: 3,
            deployment_id: None,
            last_error: None,
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_upsert_preserves_file_id() {
        let store = MemoryStore::new();
        let created = store
            .upsert_file(new_file("p1", "jobs/mmlu/job.yaml", "v1", "c1"))
            .await
            .unwrap();
        let UpsertOutcome::Created(id) = created else {
            panic!("expected Created")
        };

        let updated = store
            .upsert_file(new_file("p1", "jobs/mmlu/job.yaml", "v2", "c2"))
            .await
            .unwrap();
        assert_eq!(updated, UpsertOutcome::Updated(id.clone()));

        let file = store.get_file(&id).await.unwrap().unwrap();
        assert_eq!(file.content, "v2");
        assert_eq!(file.benchmark_type, "mmlu");
    }

    #[tokio::test]
    async fn test_upsert_idempotent_on_same_commit() {
        let store = MemoryStore::new();
        let first = store
            .upsert_file(new_file("p1", "jobs/mmlu/job.yaml", "v1", "c1"))
            .await
            .unwrap();
        let second = store
            .upsert_file(new_file("p1", "jobs/mmlu/job.yaml", "v1", "c1"))
            .await
            .unwrap();
        assert_eq!(
            second,
            UpsertOutcome::Unchanged(first.file_id().to_string())
        );
    }

    #[tokio::test]
    async fn test_stale_marking_spares_observed() {
        let store = MemoryStore::new();
        store
            .upsert_file(new_file("p1", "jobs/a/job.yaml", "a", "c1"))
            .await
            .unwrap();
        store
            .upsert_file(new_file("p1", "jobs/b/job.yaml", "b", "c1"))
            .await
            .unwrap();

        let stale = store
            .mark_unobserved_files_stale("p1", &["jobs/a/job.yaml".to_string()])
            .await
            .unwrap();
        assert_eq!(stale, 1);

        let files = store.list_files("p1", None, None).await.unwrap();
        let b = files.iter().find(|f| f.path == "jobs/b/job.yaml").unwrap();
        assert!(b.stale);
        let a = files.iter().find(|f| f.path == "jobs/a/job.yaml").unwrap();
        assert!(!a.stale);
    }

    #[tokio::test]
    async fn test_staleness_clears_when_path_reappears() {
        let store = MemoryStore::new();
        let id = store
            .upsert_file(new_file("p1", "jobs/a/job.yaml", "a", "c1"))
            .await
            .unwrap()
            .file_id()
            .to_string();
        store
            .mark_unobserved_files_stale("p1", &[])
            .await
            .unwrap();
        assert!(store.get_file(&id).await.unwrap().unwrap().stale);

        // Same blob, back in the listing: the flag resets, the id holds.
        let outcome = store
            .upsert_file(new_file("p1", "jobs/a/job.yaml", "a", "c1"))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated(id.clone()));
        assert!(!store.get_file(&id).await.unwrap().unwrap().stale);
    }

    #[tokio::test]
    async fn test_modified_file_duplicate_name_rejected() {
        let store = MemoryStore::new();
        let mf = ModifiedFile {
            modified_file_id: "m1".to_string(),
            original_file_id: "f1".to_string(),
            project_id: "p1".to_string(),
            modified_name: "custom.yaml".to_string(),
            content: "x".to_string(),
            created_at_ms: 0,
            updated_at_ms: 0,
            orphaned: false,
        };
        assert!(store.insert_modified_file(&mf).await.unwrap());

        let mut dup = mf.clone();
        dup.modified_file_id = "m2".to_string();
        assert!(!store.insert_modified_file(&dup).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_file_cascades_to_overrides() {
        let store = MemoryStore::new();
        let id = store
            .upsert_file(new_file("p1", "jobs/a/j.yaml", "a", "c"))
            .await
            .unwrap()
            .file_id()
            .to_string();
        store
            .insert_modified_file(&ModifiedFile {
                modified_file_id: "m1".to_string(),
                original_file_id: id.clone(),
                project_id: "p1".to_string(),
                modified_name: "custom.yaml".to_string(),
                content: "x".to_string(),
                created_at_ms: 0,
                updated_at_ms: 0,
                orphaned: false,
            })
            .await
            .unwrap();

        assert!(store.delete_file(&id, 42).await.unwrap());
        let file = store.get_file(&id).await.unwrap().unwrap();
        assert_eq!(file.deleted_at_ms, Some(42));
        assert!(
            store
                .get_modified_file("m1")
                .await
                .unwrap()
                .unwrap()
                .orphaned
        );
        assert!(!store.delete_file("missing", 42).await.unwrap());
    }

    #[tokio::test]
    async fn test_user_delete_survives_repoll() {
        let store = MemoryStore::new();
        let id = store
            .upsert_file(new_file("p1", "jobs/a/j.yaml", "a", "c1"))
            .await
            .unwrap()
            .file_id()
            .to_string();
        store.delete_file(&id, 42).await.unwrap();

        // The file is still in the source, unchanged: the next poll must be
        // a no-op, not an undelete.
        let repoll = store
            .upsert_file(new_file("p1", "jobs/a/j.yaml", "a", "c1"))
            .await
            .unwrap();
        assert_eq!(repoll, UpsertOutcome::Unchanged(id.clone()));
        assert_eq!(
            store.get_file(&id).await.unwrap().unwrap().deleted_at_ms,
            Some(42)
        );

        // Even a content change keeps the delete stamp.
        let changed = store
            .upsert_file(new_file("p1", "jobs/a/j.yaml", "a2", "c2"))
            .await
            .unwrap();
        assert_eq!(changed, UpsertOutcome::Updated(id.clone()));
        assert_eq!(
            store.get_file(&id).await.unwrap().unwrap().deleted_at_ms,
            Some(42)
        );
    }

    #[tokio::test]
    async fn test_claim_task_at_most_once() {
        let store = MemoryStore::new();
        store.insert_task(&make_task("t1", 0)).await.unwrap();

        assert!(store.claim_task("t1", 1).await.unwrap());
        assert!(!store.claim_task("t1", 2).await.unwrap());

        let t = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(t.state, TaskState::Firing);
    }

    #[tokio::test]
    async fn test_cancel_only_from_scheduled() {
        let store = MemoryStore::new();
        store.insert_task(&make_task("t1", 0)).await.unwrap();
        store.claim_task("t1", 1).await.unwrap();
        assert!(!store.cancel_task("t1", 2).await.unwrap());

        store.insert_task(&make_task("t2", u64::MAX)).await.unwrap();
        assert!(store.cancel_task("t2", 2).await.unwrap());
        let t2 = store.get_task("t2").await.unwrap().unwrap();
        assert_eq!(t2.state, TaskState::Cancelled);
    }

    #[tokio::test]
    async fn test_due_tasks_filters_by_time_and_state() {
        let store = MemoryStore::new();
        store.insert_task(&make_task("past", 100)).await.unwrap();
        store.insert_task(&make_task("future", u64::MAX)).await.unwrap();
        store.insert_task(&make_task("claimed", 100)).await.unwrap();
        store.claim_task("claimed", 101).await.unwrap();

        let due = store.due_tasks(1_000).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].task_id, "past");
    }

    #[tokio::test]
    async fn test_guarded_status_update() {
        let store = MemoryStore::new();
        let d = DeploymentRecord {
            deployment_id: "d1".to_string(),
            yaml_content: "kind: Job".to_string(),
            namespace: "default".to_string(),
            primary_resource_type: gauntlet_common::ResourceKind::Job,
            primary_resource_name: "job-1".to_string(),
            status: DeploymentStatus::Pending,
            created_at_ms: 0,
            updated_at_ms: 0,
            failure_count: 0,
            last_error: None,
        };
        store.insert_deployment(&d).await.unwrap();

        // Guard mismatch: no write.
        let miss = store
            .update_deployment_status(
                "d1",
                StatusUpdate {
                    from: Some(DeploymentStatus::Running),
                    to: DeploymentStatus::Completed,
                    last_error: None,
                    failure_increment: false,
                    at_ms: 1,
                },
            )
            .await
            .unwrap();
        assert!(!miss);

        let hit = store
            .update_deployment_status(
                "d1",
                StatusUpdate {
                    from: Some(DeploymentStatus::Pending),
                    to: DeploymentStatus::Running,
                    last_error: None,
                    failure_increment: false,
                    at_ms: 2,
                },
            )
            .await
            .unwrap();
        assert!(hit);
        let d = store.get_deployment("d1").await.unwrap().unwrap();
        assert_eq!(d.status, DeploymentStatus::Running);
    }

    #[tokio::test]
    async fn test_delete_project_cascades() {
        let store = MemoryStore::new();
        let p = Project {
            project_id: "p1".to_string(),
            name: "bench".to_string(),
            owner: "acme".to_string(),
            repo: "r".to_string(),
            git_ref: "main".to_string(),
            config_folder: "configs".to_string(),
            job_folder: "jobs".to_string(),
            poll_interval_secs: 60,
            credentials_ref: None,
            created_at_ms: 0,
            updated_at_ms: 0,
            last_sync_ms: None,
        };
        store.insert_project(&p).await.unwrap();
        store
            .upsert_file(new_file("p1", "jobs/a/j.yaml", "a", "c"))
            .await
            .unwrap();

        assert!(store.delete_project("p1").await.unwrap());
        assert!(store.list_files("p1", None, None).await.unwrap().is_empty());
        assert!(store.get_project("p1").await.unwrap().is_none());
    }
}
