use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gauntlet_common::{
    now_ms,
    retry::backoff_unjittered,
    ErrorKind, EvaluationTask, TaskState,
};
use gauntlet_store::Store;

use crate::compose::{compose_submission, Composition};

/// Retry backoff for failed submissions: base 60 s, cap 10 min.
const RETRY_BASE: Duration = Duration::from_secs(60);
const RETRY_CAP: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluateRequest {
    pub project_id: String,
    #[serde(default)]
    pub benchmark_type: Option<String>,
    pub job_file_id: String,
    #[serde(default)]
    pub config_file_id: Option<String>,
    /// Endpoint of the inference server the benchmark talks to.
    #[serde(alias = "vllm-url", alias = "vllm_model_endpoint")]
    pub model_endpoint: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl EvaluateRequest {
    pub fn validate(&self) -> Result<(), ErrorKind> {
        if self.model_endpoint.trim().is_empty() {
            return Err(ErrorKind::Invalid("model_endpoint cannot be empty".to_string()));
        }
        if !self.model_endpoint.starts_with("http://")
            && !self.model_endpoint.starts_with("https://")
        {
            return Err(ErrorKind::Invalid(
                "model_endpoint must be an http(s) url".to_string(),
            ));
        }
        Ok(())
    }
}

/// Delayed, retried composition of manifest store + deployment engine.
///
/// The sweeper is the only writer of the `scheduled → firing` transition;
/// the conditional claim in the store keeps firing at-most-once even
/// across process restarts.
pub struct EvalScheduler {
    store: Arc<dyn Store>,
    http: reqwest::Client,
    deployer_url: String,
    pub delay: Duration,
    max_attempts: u32,
    default_namespace: String,
}

impl EvalScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        deployer_url: String,
        delay: Duration,
        max_attempts: u32,
        default_namespace: String,
    ) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            store,
            http,
            deployer_url,
            delay,
            max_attempts,
            default_namespace,
        }
    }

    /// Create the task; it fires `delay` from now.
    pub async fn schedule(&self, req: EvaluateRequest) -> Result<EvaluationTask, ErrorKind> {
        req.validate()?;
        // Resolve now so a bad file id fails the request, not the firing.
        let job = self.resolve_content(&req.project_id, &req.job_file_id).await?;
        if let Some(config_id) = &req.config_file_id {
            self.resolve_content(&req.project_id, config_id).await?;
        }

        let now = now_ms();
        let task = EvaluationTask {
            task_id: uuid::Uuid::new_v4().to_string(),
            project_id: req.project_id.clone(),
            benchmark_type: req
                .benchmark_type
                .clone()
                .unwrap_or_else(|| job.benchmark_type.clone()),
            job_file_id: req.job_file_id.clone(),
            config_file_id: req.config_file_id.clone(),
            model_endpoint: req.model_endpoint.clone(),
            name: req.name.clone().unwrap_or_else(|| "evaluation".to_string()),
            scheduled_at_ms: now + self.delay.as_millis() as u64,
            state: TaskState::Scheduled,
            attempts: 0,
            max_attempts: self.max_attempts,
            deployment_id: None,
            last_error: None,
            created_at_ms: now,
            updated_at_ms: now,
        };
        self.store
            .insert_task(&task)
            .await
            .map_err(|e| ErrorKind::Upstream(format!("store: {e}")))?;

        info!(task_id = %task.task_id, scheduled_at_ms = task.scheduled_at_ms, "evaluation scheduled");
        Ok(task)
    }

    pub async fn cancel(&self, task_id: &str) -> Result<EvaluationTask, ErrorKind> {
        let cancelled = self
            .store
            .cancel_task(task_id, now_ms())
            .await
            .map_err(|e| ErrorKind::Upstream(format!("store: {e}")))?;
        let task = self
            .store
            .get_task(task_id)
            .await
            .map_err(|e| ErrorKind::Upstream(format!("store: {e}")))?
            .ok_or_else(|| ErrorKind::NotFound(format!("task {task_id}")))?;
        if !cancelled {
            return Err(ErrorKind::Conflict(format!(
                "task {task_id} is {:?}, only scheduled tasks can be cancelled",
                task.state
            )));
        }
        Ok(task)
    }

    /// The sweeper: single in-flight sweep per tick.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "evaluation sweeper started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("evaluation sweeper stopped");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }
            if let Err(e) = self.sweep_once().await {
                warn!(error = %e, "evaluation sweep failed");
            }
        }
    }

    pub async fn sweep_once(&self) -> anyhow::Result<()> {
        for task in self.store.due_tasks(now_ms()).await? {
            if !self.store.claim_task(&task.task_id, now_ms()).await? {
                // Someone else won the claim; skip.
                continue;
            }
            self.fire(&task).await;
        }
        Ok(())
    }

    async fn fire(&self, task: &EvaluationTask) {
        info!(task_id = %task.task_id, "firing evaluation task");
        match self.fire_inner(task).await {
            Ok(deployment_id) => {
                if let Err(e) = self
                    .store
                    .complete_task(&task.task_id, &deployment_id, now_ms())
                    .await
                {
                    warn!(task_id = %task.task_id, error = %e, "failed to record completion");
                }
                info!(task_id = %task.task_id, deployment_id, "evaluation task completed");
            }
            Err(kind) => {
                let attempts = task.attempts + 1;
                let result = if attempts < task.max_attempts {
                    let next = now_ms()
                        + backoff_unjittered(RETRY_BASE, attempts, RETRY_CAP).as_millis() as u64;
                    warn!(task_id = %task.task_id, attempts, error = %kind, "submission failed, rescheduling");
                    self.store
                        .reschedule_task(&task.task_id, next, &kind.to_string(), now_ms())
                        .await
                } else {
                    warn!(task_id = %task.task_id, attempts, error = %kind, "submission failed, giving up");
                    self.store
                        .fail_task(&task.task_id, &kind.to_string(), now_ms())
                        .await
                };
                if let Err(e) = result {
                    warn!(task_id = %task.task_id, error = %e, "failed to record outcome");
                }
            }
        }
    }

    async fn fire_inner(&self, task: &EvaluationTask) -> Result<String, ErrorKind> {
        let composition = self.compose_for_task(task).await?;
        self.submit(&composition).await
    }

    /// Build the submission for a task: job + optional config, overrides
    /// taking precedence over originals.
    pub async fn compose_for_task(&self, task: &EvaluationTask) -> Result<Composition, ErrorKind> {
        let job = self
            .resolve_content(&task.project_id, &task.job_file_id)
            .await?;
        let config = match &task.config_file_id {
            Some(id) => Some(self.resolve_content(&task.project_id, id).await?.content),
            None => None,
        };
        compose_submission(&job.content, config.as_deref(), &task.model_endpoint)
    }

    /// Resolve a file id to its effective content: a modified-file id wins
    /// directly; an original id is shadowed by its most recently updated
    /// override when one exists.
    pub async fn resolve_content(
        &self,
        project_id: &str,
        file_id: &str,
    ) -> Result<ResolvedFile, ErrorKind> {
        if let Some(modified) = self
            .store
            .get_modified_file(file_id)
            .await
            .map_err(|e| ErrorKind::Upstream(format!("store: {e}")))?
        {
            return Ok(ResolvedFile {
                content: modified.content,
                benchmark_type: String::new(),
            });
        }

        let original = self
            .store
            .get_file(file_id)
            .await
            .map_err(|e| ErrorKind::Upstream(format!("store: {e}")))?
            .ok_or_else(|| ErrorKind::NotFound(format!("file {file_id}")))?;

        let overrides = self
            .store
            .list_modified_files(project_id, Some(file_id))
            .await
            .map_err(|e| ErrorKind::Upstream(format!("store: {e}")))?;

        let content = overrides
            .into_iter()
            .max_by_key(|m| m.updated_at_ms)
            .map(|m| m.content)
            .unwrap_or(original.content);

        Ok(ResolvedFile {
            content,
            benchmark_type: original.benchmark_type,
        })
    }

    /// Hand the composed manifest to the deployment engine.
    async fn submit(&self, composition: &Composition) -> Result<String, ErrorKind> {
        let url = format!("{}/deploy", self.deployer_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "yaml_content": composition.yaml,
                "namespace": self.default_namespace,
                "name": composition.job_name,
            }))
            .send()
            .await
            .map_err(|e| ErrorKind::Transient(format!("deployer unreachable: {e}")))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ErrorKind::Upstream(format!("deployer response: {e}")))?;

        if !status.is_success() {
            return Err(ErrorKind::Upstream(format!(
                "deployer returned {status}: {body}"
            )));
        }
        body.get("deployment_id")
            .and_then(|id| id.as_str())
            .map(|id| id.to_string())
            .ok_or_else(|| {
                ErrorKind::Upstream("deployer response missing deployment_id".to_string())
            })
    }

    /// The `/run` path: same composition, no task, caller waits.
    pub async fn run_now(&self, req: EvaluateRequest) -> Result<(String, Composition), ErrorKind> {
        req.validate()?;
        let job = self.resolve_content(&req.project_id, &req.job_file_id).await?;
        let config = match &req.config_file_id {
            Some(id) => Some(self.resolve_content(&req.project_id, id).await?.content),
            None => None,
        };
        let composition = compose_submission(&job.content, config.as_deref(), &req.model_endpoint)?;
        let deployment_id = self.submit(&composition).await?;
        Ok((deployment_id, composition))
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedFile {
    pub content: String,
    pub benchmark_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_common::{FileType, ModifiedFile};
    use gauntlet_store::{MemoryStore, NewFile};

    const JOB: &str = "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: eval-job\nspec:\n  template:\n    spec:\n      containers:\n        - name: bench\n          image: harness:latest\n";

    fn scheduler_with(store: Arc<dyn Store>) -> EvalScheduler {
        // Port 9 on localhost: nothing listens, submissions fail fast.
        EvalScheduler::new(
            store,
            "http://127.0.0.1:9".to_string(),
            Duration::from_secs(0),
            3,
            "default".to_string(),
        )
    }

    async fn seed_job(store: &MemoryStore) -> String {
        store
            .upsert_file(NewFile {
                project_id: "p1",
                path: "jobs/mmlu/job.yaml",
                content: JOB,
                file_type: FileType::Job,
                source_commit: "c1",
                observed_at_ms: 0,
            })
            .await
            .unwrap()
            .file_id()
            .to_string()
    }

    fn request(job_file_id: &str) -> EvaluateRequest {
        EvaluateRequest {
            project_id: "p1".to_string(),
            benchmark_type: None,
            job_file_id: job_file_id.to_string(),
            config_file_id: None,
            model_endpoint: "http://svc:8000".to_string(),
            name: None,
        }
    }

    #[test]
    fn test_request_aliases() {
        let raw = r#"{"project_id": "p", "job_file_id": "f", "vllm-url": "http://svc:8000"}"#;
        let req: EvaluateRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.model_endpoint, "http://svc:8000");
    }

    #[test]
    fn test_request_validation() {
        let mut req = request("f");
        req.model_endpoint = "svc:8000".to_string();
        assert!(req.validate().is_err());
        req.model_endpoint = "http://svc:8000".to_string();
        assert!(req.validate().is_ok());
    }

    #[tokio::test]
    async fn test_schedule_sets_delay_and_state() {
        let store = Arc::new(MemoryStore::new());
        let job_id = seed_job(&store).await;
        let sched = EvalScheduler::new(
            store.clone(),
            "http://127.0.0.1:9".to_string(),
            Duration::from_secs(1800),
            3,
            "default".to_string(),
        );

        let before = now_ms();
        let task = sched.schedule(request(&job_id)).await.unwrap();
        assert_eq!(task.state, TaskState::Scheduled);
        assert!(task.scheduled_at_ms >= before + 1_790_000);
        assert_eq!(task.benchmark_type, "mmlu");
    }

    #[tokio::test]
    async fn test_schedule_rejects_unknown_file() {
        let store = Arc::new(MemoryStore::new());
        let sched = scheduler_with(store);
        let err = sched.schedule(request("no-such-file")).await.unwrap_err();
        assert!(matches!(err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_override_shadows_original() {
        let store = Arc::new(MemoryStore::new());
        let job_id = seed_job(&store).await;

        let custom = JOB.replace("harness:latest", "harness:custom");
        store
            .insert_modified_file(&ModifiedFile {
                modified_file_id: "m1".to_string(),
                original_file_id: job_id.clone(),
                project_id: "p1".to_string(),
                modified_name: "custom.yaml".to_string(),
                content: custom.clone(),
                created_at_ms: 5,
                updated_at_ms: 5,
                orphaned: false,
            })
            .await
            .unwrap();

        let sched = scheduler_with(store);
        let resolved = sched.resolve_content("p1", &job_id).await.unwrap();
        assert_eq!(resolved.content, custom);
    }

    #[tokio::test]
    async fn test_failed_submission_reschedules_with_backoff() {
        let store = Arc::new(MemoryStore::new());
        let job_id = seed_job(&store).await;
        let sched = scheduler_with(store.clone());

        let task = sched.schedule(request(&job_id)).await.unwrap();
        sched.sweep_once().await.unwrap();

        let after = store.get_task(&task.task_id).await.unwrap().unwrap();
        assert_eq!(after.state, TaskState::Scheduled);
        assert_eq!(after.attempts, 1);
        assert!(after.last_error.is_some());
        // First retry lands one base interval out.
        assert!(after.scheduled_at_ms >= task.scheduled_at_ms + 59_000);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail_task() {
        let store = Arc::new(MemoryStore::new());
        let job_id = seed_job(&store).await;
        let sched = EvalScheduler::new(
            store.clone(),
            "http://127.0.0.1:9".to_string(),
            Duration::from_secs(0),
            1,
            "default".to_string(),
        );

        let task = sched.schedule(request(&job_id)).await.unwrap();
        sched.sweep_once().await.unwrap();

        let after = store.get_task(&task.task_id).await.unwrap().unwrap();
        assert_eq!(after.state, TaskState::Failed);
        assert_eq!(after.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancelled_task_never_fires() {
        let store = Arc::new(MemoryStore::new());
        let job_id = seed_job(&store).await;
        let sched = scheduler_with(store.clone());

        let task = sched.schedule(request(&job_id)).await.unwrap();
        sched.cancel(&task.task_id).await.unwrap();
        sched.sweep_once().await.unwrap();

        let after = store.get_task(&task.task_id).await.unwrap().unwrap();
        assert_eq!(after.state, TaskState::Cancelled);
        assert_eq!(after.attempts, 0);
    }

    #[tokio::test]
    async fn test_cancel_firing_task_conflicts() {
        let store = Arc::new(MemoryStore::new());
        let job_id = seed_job(&store).await;
        let sched = scheduler_with(store.clone());

        let task = sched.schedule(request(&job_id)).await.unwrap();
        store.claim_task(&task.task_id, now_ms()).await.unwrap();

        let err = sched.cancel(&task.task_id).await.unwrap_err();
        assert!(matches!(err, ErrorKind::Conflict(_)));
    }
}
