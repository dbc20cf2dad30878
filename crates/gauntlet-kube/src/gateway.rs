use std::time::Duration;

use futures_util::AsyncBufReadExt;
use k8s_openapi::api::apps::v1::Deployment as K8sDeployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, AttachedProcess, DeleteParams, ListParams, LogParams, Patch, PatchParams};
use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use kube::Client;
use tracing::{debug, info, warn};

use gauntlet_common::{AppliedResource, DeploymentStatus, ErrorKind};

use crate::manifest::{self, doc_meta, DocMeta};

/// Field manager for server-side apply.
const FIELD_MANAGER: &str = "gauntlet";

/// Normalized Job status as read from the cluster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobStatusSnapshot {
    pub active: i32,
    pub succeeded: i32,
    pub failed: i32,
    pub completions: i32,
    pub backoff_limit: i32,
    pub start_time: Option<String>,
    pub completion_time: Option<String>,
    /// Message of a `Failed` condition, when the cluster has set one.
    pub failure_message: Option<String>,
}

impl JobStatusSnapshot {
    /// Phase from counters alone: completed once enough pods succeeded,
    /// failed once past the backoff limit or the cluster says so, running
    /// while any pod is active.
    pub fn phase(&self) -> DeploymentStatus {
        if self.failure_message.is_some() || self.failed > self.backoff_limit {
            DeploymentStatus::Failed
        } else if self.succeeded >= self.completions.max(1) {
            DeploymentStatus::Completed
        } else if self.active > 0 || self.failed > 0 {
            DeploymentStatus::Running
        } else {
            DeploymentStatus::Pending
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentStatusSnapshot {
    pub replicas: i32,
    pub ready_replicas: i32,
}

impl DeploymentStatusSnapshot {
    pub fn phase(&self) -> DeploymentStatus {
        if self.replicas > 0 && self.ready_replicas >= self.replicas {
            DeploymentStatus::Running
        } else {
            DeploymentStatus::Pending
        }
    }
}

/// One pod belonging to a tracked workload.
#[derive(Debug, Clone)]
pub struct PodRef {
    pub name: String,
    pub phase: String,
    pub containers: Vec<String>,
    pub created_at: Option<String>,
    /// Terminated-container exit info, when the pod errored.
    pub failure_message: Option<String>,
}

fn map_kube_err(err: kube::Error) -> ErrorKind {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => ErrorKind::NotFound(ae.message),
        kube::Error::Api(ae) if ae.code == 401 || ae.code == 403 => {
            ErrorKind::Unauthorized(ae.message)
        }
        kube::Error::Api(ae) if ae.code == 409 => ErrorKind::Conflict(ae.message),
        other => ErrorKind::Upstream(format!("cluster api: {other}")),
    }
}

/// Terminated-container exit info for `last_error` surfaces.
pub fn pod_failure_message(pod: &Pod) -> Option<String> {
    let status = pod.status.as_ref()?;
    for cs in status.container_statuses.as_deref().unwrap_or_default() {
        if let Some(term) = cs.state.as_ref().and_then(|s| s.terminated.as_ref()) {
            if term.exit_code != 0 {
                let reason = term.reason.as_deref().unwrap_or("Error");
                return Some(format!(
                    "container {} exited with code {} ({reason})",
                    cs.name, term.exit_code
                ));
            }
        }
    }
    if status.phase.as_deref() == Some("Failed") {
        return Some(
            status
                .reason
                .clone()
                .unwrap_or_else(|| "pod failed".to_string()),
        );
    }
    None
}

/// The one client every service shares for cluster access.
#[derive(Clone)]
pub struct ClusterGateway {
    client: Client,
    call_timeout: Duration,
}

impl ClusterGateway {
    /// In-cluster config first, kubeconfig (`KUBECONFIG`) as fallback,
    /// kube's inference order matches the original chain.
    pub async fn connect(call_timeout: Duration) -> Result<Self, ErrorKind> {
        let client = Client::try_default()
            .await
            .map_err(|e| ErrorKind::Fatal(format!("no kubernetes configuration: {e}")))?;
        Ok(Self {
            client,
            call_timeout,
        })
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    async fn timed<T, F>(&self, what: &str, fut: F) -> Result<T, ErrorKind>
    where
        F: std::future::Future<Output = Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(map_kube_err(e)),
            Err(_) => Err(ErrorKind::Transient(format!("{what} timed out"))),
        }
    }

    fn dynamic_api(&self, meta: &DocMeta, namespace: &str) -> Api<DynamicObject> {
        let (group, version) = meta.group_version();
        let ar = ApiResource {
            group,
            version,
            api_version: meta.api_version.clone(),
            kind: meta.kind.clone(),
            plural: meta.plural(),
        };
        Api::namespaced_with(self.client.clone(), namespace, &ar)
    }

    /// Apply every document with server-side semantics: create if absent,
    /// update if present by name+namespace+kind. Documents are applied in
    /// order; the first is the primary resource.
    pub async fn apply(
        &self,
        yaml: &str,
        namespace: &str,
    ) -> Result<Vec<AppliedResource>, ErrorKind> {
        let mut docs = manifest::parse_documents(yaml)?;
        let mut applied = Vec::with_capacity(docs.len());

        for doc in &mut docs {
            manifest::default_namespace(doc, namespace);
            let meta = doc_meta(doc)?;
            let ns = meta.namespace.as_deref().unwrap_or(namespace);

            let obj: DynamicObject = serde_yaml::from_value(doc.clone())
                .map_err(|e| ErrorKind::Invalid(format!("manifest not applyable: {e}")))?;

            let api = self.dynamic_api(&meta, ns);
            let params = PatchParams::apply(FIELD_MANAGER).force();
            self.timed(
                "apply",
                api.patch(&meta.name, &params, &Patch::Apply(&obj)),
            )
            .await?;

            debug!(kind = %meta.kind, name = %meta.name, namespace = ns, "applied resource");
            applied.push(meta.applied(namespace));
        }

        info!(count = applied.len(), namespace, "manifest applied");
        Ok(applied)
    }

    /// Delete every resource named by the manifest. Resources already gone
    /// are skipped, so delete is idempotent.
    pub async fn delete(
        &self,
        yaml: &str,
        namespace: &str,
    ) -> Result<Vec<AppliedResource>, ErrorKind> {
        let mut docs = manifest::parse_documents(yaml)?;
        let mut deleted = Vec::new();

        for doc in &mut docs {
            manifest::default_namespace(doc, namespace);
            let meta = doc_meta(doc)?;
            let ns = meta.namespace.as_deref().unwrap_or(namespace);
            let api = self.dynamic_api(&meta, ns);

            match tokio::time::timeout(
                self.call_timeout,
                api.delete(&meta.name, &DeleteParams::default()),
            )
            .await
            {
                Ok(Ok(_)) => deleted.push(meta.applied(namespace)),
                Ok(Err(kube::Error::Api(ae))) if ae.code == 404 => {
                    debug!(kind = %meta.kind, name = %meta.name, "resource already absent");
                }
                Ok(Err(e)) => return Err(map_kube_err(e)),
                Err(_) => return Err(ErrorKind::Transient("delete timed out".to_string())),
            }
        }

        info!(count = deleted.len(), namespace, "manifest deleted");
        Ok(deleted)
    }

    pub async fn job_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<JobStatusSnapshot, ErrorKind> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let job = self.timed("job status", jobs.get(name)).await?;

        let spec = job.spec.unwrap_or_default();
        let status = job.status.unwrap_or_default();

        let failure_message = status
            .conditions
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|c| c.type_ == "Failed" && c.status == "True")
            .map(|c| {
                c.message
                    .clone()
                    .unwrap_or_else(|| "job failed".to_string())
            });

        Ok(JobStatusSnapshot {
            active: status.active.unwrap_or(0),
            succeeded: status.succeeded.unwrap_or(0),
            failed: status.failed.unwrap_or(0),
            completions: spec.completions.unwrap_or(1),
            backoff_limit: spec.backoff_limit.unwrap_or(6),
            start_time: status.start_time.map(|t| t.0.to_rfc3339()),
            completion_time: status.completion_time.map(|t| t.0.to_rfc3339()),
            failure_message,
        })
    }

    pub async fn deployment_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentStatusSnapshot, ErrorKind> {
        let deployments: Api<K8sDeployment> = Api::namespaced(self.client.clone(), namespace);
        let d = self.timed("deployment status", deployments.get(name)).await?;
        let status = d.status.unwrap_or_default();
        Ok(DeploymentStatusSnapshot {
            replicas: status.replicas.unwrap_or(0),
            ready_replicas: status.ready_replicas.unwrap_or(0),
        })
    }

    pub async fn statefulset_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentStatusSnapshot, ErrorKind> {
        use k8s_openapi::api::apps::v1::StatefulSet;
        let sets: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let s = self.timed("statefulset status", sets.get(name)).await?;
        let status = s.status.unwrap_or_default();
        Ok(DeploymentStatusSnapshot {
            replicas: status.replicas,
            ready_replicas: status.ready_replicas.unwrap_or(0),
        })
    }

    /// Pods of a Job via the `job-name` label, newest first.
    pub async fn job_pods(&self, namespace: &str, job_name: &str) -> Result<Vec<PodRef>, ErrorKind> {
        self.labeled_pods(namespace, &format!("job-name={job_name}"))
            .await
    }

    /// Pods matching an arbitrary label selector, newest first.
    pub async fn labeled_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PodRef>, ErrorKind> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(selector);
        let list = self.timed("pod list", pods.list(&params)).await?;

        let mut refs: Vec<PodRef> = list
            .items
            .iter()
            .map(|p| PodRef {
                name: p.metadata.name.clone().unwrap_or_default(),
                phase: p
                    .status
                    .as_ref()
                    .and_then(|s| s.phase.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
                containers: p
                    .spec
                    .as_ref()
                    .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
                    .unwrap_or_default(),
                created_at: p
                    .metadata
                    .creation_timestamp
                    .as_ref()
                    .map(|t| t.0.to_rfc3339()),
                failure_message: pod_failure_message(p),
            })
            .collect();
        refs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(refs)
    }

    /// Finite log snapshot: the last `tail_lines` lines of one container.
    pub async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: i64,
        since_seconds: Option<i64>,
    ) -> Result<Vec<String>, ErrorKind> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: container.map(|c| c.to_string()),
            tail_lines: Some(tail_lines),
            since_seconds,
            ..LogParams::default()
        };
        let text = self.timed("pod logs", pods.logs(pod, &params)).await?;
        Ok(text.lines().map(|l| l.to_string()).collect())
    }

    /// Infinite follow stream of log lines. Unbounded; the caller drops the
    /// stream to stop it.
    pub async fn pod_log_stream(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: i64,
        since_seconds: Option<i64>,
    ) -> Result<impl futures_util::Stream<Item = Result<String, std::io::Error>>, ErrorKind> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: container.map(|c| c.to_string()),
            tail_lines: Some(tail_lines),
            since_seconds,
            follow: true,
            ..LogParams::default()
        };
        let reader = pods.log_stream(pod, &params).await.map_err(map_kube_err)?;
        Ok(reader.lines())
    }

    /// Open an exec channel. With `tty` the remote merges stderr into the
    /// terminal stream.
    pub async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        command: Vec<String>,
        tty: bool,
    ) -> Result<AttachedProcess, ErrorKind> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams {
            container: container.map(|c| c.to_string()),
            stdin: true,
            stdout: true,
            stderr: !tty,
            tty,
            ..AttachParams::default()
        };
        match pods.exec(pod, command.clone(), &params).await {
            Ok(attached) => Ok(attached),
            Err(e) => {
                warn!(pod, ?command, error = %e, "exec failed");
                Err(map_kube_err(e))
            }
        }
    }

    pub async fn version(&self) -> Result<String, ErrorKind> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(map_kube_err)?;
        Ok(info.git_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerState, ContainerStateTerminated, ContainerStatus, PodStatus};

    fn terminated_pod(exit_code: i32) -> Pod {
        Pod {
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    name: "bench".to_string(),
                    state: Some(ContainerState {
                        terminated: Some(ContainerStateTerminated {
                            exit_code,
                            reason: Some("Error".to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_failure_message_on_nonzero_exit() {
        let msg = pod_failure_message(&terminated_pod(1)).unwrap();
        assert!(msg.contains("bench"));
        assert!(msg.contains("exited with code 1"));
    }

    #[test]
    fn test_pod_failure_message_none_on_success() {
        assert!(pod_failure_message(&terminated_pod(0)).is_none());
        assert!(pod_failure_message(&Pod::default()).is_none());
    }

    #[test]
    fn test_job_phase_completed() {
        let snap = JobStatusSnapshot {
            succeeded: 1,
            completions: 1,
            backoff_limit: 6,
            ..Default::default()
        };
        assert_eq!(snap.phase(), DeploymentStatus::Completed);
    }

    #[test]
    fn test_job_phase_failed_past_backoff() {
        let snap = JobStatusSnapshot {
            failed: 7,
            completions: 1,
            backoff_limit: 6,
            ..Default::default()
        };
        assert_eq!(snap.phase(), DeploymentStatus::Failed);
    }

    #[test]
    fn test_job_phase_failed_on_condition() {
        let snap = JobStatusSnapshot {
            failed: 1,
            completions: 1,
            backoff_limit: 6,
            failure_message: Some("BackoffLimitExceeded".to_string()),
            ..Default::default()
        };
        assert_eq!(snap.phase(), DeploymentStatus::Failed);
    }

    #[test]
    fn test_job_phase_running_while_active_or_retrying() {
        let active = JobStatusSnapshot {
            active: 1,
            completions: 1,
            backoff_limit: 6,
            ..Default::default()
        };
        assert_eq!(active.phase(), DeploymentStatus::Running);

        // A failed pod below the backoff limit is still retrying.
        let retrying = JobStatusSnapshot {
            failed: 2,
            completions: 1,
            backoff_limit: 6,
            ..Default::default()
        };
        assert_eq!(retrying.phase(), DeploymentStatus::Running);
    }

    #[test]
    fn test_job_phase_pending_before_start() {
        let snap = JobStatusSnapshot {
            completions: 1,
            backoff_limit: 6,
            ..Default::default()
        };
        assert_eq!(snap.phase(), DeploymentStatus::Pending);
    }

    #[test]
    fn test_deployment_phase() {
        let ready = DeploymentStatusSnapshot {
            replicas: 2,
            ready_replicas: 2,
        };
        assert_eq!(ready.phase(), DeploymentStatus::Running);

        let rolling = DeploymentStatusSnapshot {
            replicas: 2,
            ready_replicas: 1,
        };
        assert_eq!(rolling.phase(), DeploymentStatus::Pending);
    }
}
