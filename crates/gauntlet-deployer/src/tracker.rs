use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gauntlet_common::{
    now_ms, DeploymentRecord, DeploymentStatus, ErrorKind, ResourceKind,
};
use gauntlet_kube::{manifest, ClusterGateway};
use gauntlet_store::{StatusUpdate, Store};

/// Parallel status reads per reconcile sweep.
const RECONCILE_CONCURRENCY: usize = 16;

/// Owns deployment records: submit, reconcile, delete.
pub struct Tracker {
    store: Arc<dyn Store>,
    gateway: ClusterGateway,
    max_failures: u32,
}

impl Tracker {
    pub fn new(store: Arc<dyn Store>, gateway: ClusterGateway, max_failures: u32) -> Self {
        Self {
            store,
            gateway,
            max_failures,
        }
    }

    /// Record first, then apply. The pending record exists before the
    /// cluster sees anything, so a crash between the two leaves a record
    /// the reconciler can resolve instead of an untracked workload.
    pub async fn submit(&self, yaml: &str, namespace: &str) -> Result<DeploymentRecord, ErrorKind> {
        let docs = manifest::parse_documents(yaml)?;
        let primary = manifest::primary_resource(&docs)?;

        let now = now_ms();
        let mut record = DeploymentRecord {
            deployment_id: ulid::Ulid::new().to_string(),
            yaml_content: yaml.to_string(),
            namespace: namespace.to_string(),
            primary_resource_type: primary.resource_kind(),
            primary_resource_name: primary.name.clone(),
            status: DeploymentStatus::Pending,
            created_at_ms: now,
            updated_at_ms: now,
            failure_count: 0,
            last_error: None,
        };
        self.store
            .insert_deployment(&record)
            .await
            .map_err(|e| ErrorKind::Upstream(format!("store: {e}")))?;

        match self.gateway.apply(yaml, namespace).await {
            Ok(applied) => {
                info!(
                    deployment_id = %record.deployment_id,
                    primary = %primary.name,
                    resources = applied.len(),
                    "deployment submitted"
                );
                Ok(record)
            }
            Err(kind) => {
                let _ = self
                    .store
                    .update_deployment_status(
                        &record.deployment_id,
                        StatusUpdate {
                            from: Some(DeploymentStatus::Pending),
                            to: DeploymentStatus::Failed,
                            last_error: Some(kind.to_string()),
                            failure_increment: true,
                            at_ms: now_ms(),
                        },
                    )
                    .await;
                record.status = DeploymentStatus::Failed;
                record.last_error = Some(kind.to_string());
                Err(kind)
            }
        }
    }

    /// Delete cluster resources using the stored YAML, then mark deleted.
    /// Idempotent: an already-deleted record is returned as-is.
    pub async fn delete_by_id(&self, deployment_id: &str) -> Result<DeploymentRecord, ErrorKind> {
        let record = self
            .store
            .get_deployment(deployment_id)
            .await
            .map_err(|e| ErrorKind::Upstream(format!("store: {e}")))?
            .ok_or_else(|| ErrorKind::NotFound(format!("deployment {deployment_id}")))?;

        if record.status == DeploymentStatus::Deleted {
            return Ok(record);
        }

        self.gateway
            .delete(&record.yaml_content, &record.namespace)
            .await?;

        self.store
            .update_deployment_status(
                deployment_id,
                StatusUpdate {
                    from: None,
                    to: DeploymentStatus::Deleted,
                    last_error: None,
                    failure_increment: false,
                    at_ms: now_ms(),
                },
            )
            .await
            .map_err(|e| ErrorKind::Upstream(format!("store: {e}")))?;

        info!(deployment_id, "deployment deleted");
        self.store
            .get_deployment(deployment_id)
            .await
            .map_err(|e| ErrorKind::Upstream(format!("store: {e}")))?
            .ok_or_else(|| ErrorKind::NotFound(format!("deployment {deployment_id}")))
    }

    /// Delete-by-manifest: mirror of `submit`, for callers holding the
    /// original YAML instead of an id.
    pub async fn delete_by_yaml(
        &self,
        yaml: &str,
        namespace: &str,
    ) -> Result<Vec<gauntlet_common::AppliedResource>, ErrorKind> {
        let deleted = self.gateway.delete(yaml, namespace).await?;
        let marked = self
            .store
            .mark_deployments_deleted_by_yaml(namespace, yaml, now_ms())
            .await
            .map_err(|e| ErrorKind::Upstream(format!("store: {e}")))?;
        info!(namespace, resources = deleted.len(), marked, "manifest deleted");
        Ok(deleted)
    }

    /// Reconcile every open deployment once, with bounded parallelism.
    pub async fn reconcile_once(&self) -> anyhow::Result<()> {
        let open = self.store.list_open_deployments().await?;
        if open.is_empty() {
            return Ok(());
        }

        stream::iter(open)
            .for_each_concurrent(RECONCILE_CONCURRENCY, |d| async move {
                if let Err(e) = self.reconcile_deployment(&d).await {
                    warn!(deployment_id = %d.deployment_id, error = %e, "reconcile failed");
                }
            })
            .await;
        Ok(())
    }

    async fn reconcile_deployment(&self, d: &DeploymentRecord) -> anyhow::Result<()> {
        let observed = match d.primary_resource_type {
            ResourceKind::Job => {
                match self
                    .gateway
                    .job_status(&d.namespace, &d.primary_resource_name)
                    .await
                {
                    Ok(snap) => {
                        let mut error = snap.failure_message.clone();
                        let phase = snap.phase();
                        // Pull pod exit info for the error surface once the
                        // job is visibly failing.
                        if (phase == DeploymentStatus::Failed || snap.failed > 0)
                            && error.is_none()
                        {
                            if let Ok(pods) = self
                                .gateway
                                .job_pods(&d.namespace, &d.primary_resource_name)
                                .await
                            {
                                error = pods.iter().find_map(|p| p.failure_message.clone());
                            }
                        }
                        Observation::Phase {
                            phase,
                            pod_failed: snap.failed > d.failure_count as i32,
                            error,
                        }
                    }
                    Err(ErrorKind::NotFound(_)) => Observation::Gone,
                    Err(kind) => Observation::Unobservable(kind),
                }
            }
            ResourceKind::Deployment => {
                match self
                    .gateway
                    .deployment_status(&d.namespace, &d.primary_resource_name)
                    .await
                {
                    Ok(snap) => Observation::Phase {
                        phase: snap.phase(),
                        pod_failed: false,
                        error: None,
                    },
                    Err(ErrorKind::NotFound(_)) => Observation::Gone,
                    Err(kind) => Observation::Unobservable(kind),
                }
            }
            ResourceKind::Statefulset => {
                match self
                    .gateway
                    .statefulset_status(&d.namespace, &d.primary_resource_name)
                    .await
                {
                    Ok(snap) => Observation::Phase {
                        phase: snap.phase(),
                        pod_failed: false,
                        error: None,
                    },
                    Err(ErrorKind::NotFound(_)) => Observation::Gone,
                    Err(kind) => Observation::Unobservable(kind),
                }
            }
            // Non-workload kinds have no lifecycle of their own: applied
            // means running.
            _ => Observation::Phase {
                phase: DeploymentStatus::Running,
                pod_failed: false,
                error: None,
            },
        };

        let next = match observed {
            Observation::Gone => Transition {
                to: DeploymentStatus::Deleted,
                error: Some("resource disappeared from cluster".to_string()),
                increment: false,
            },
            Observation::Unobservable(kind) => {
                // Observation failure: keep state, log, try next tick.
                warn!(
                    deployment_id = %d.deployment_id,
                    error = %kind,
                    "status unobservable"
                );
                return Ok(());
            }
            Observation::Phase {
                phase,
                pod_failed,
                error,
            } => {
                let exhausted =
                    d.failure_count + u32::from(pod_failed) >= self.max_failures && pod_failed;
                let to = if exhausted { DeploymentStatus::Failed } else { phase };
                Transition {
                    to,
                    error,
                    increment: pod_failed,
                }
            }
        };

        if next.to == d.status && !next.increment {
            return Ok(());
        }
        if next.to != d.status && !d.status.can_transition_to(next.to) {
            return Ok(());
        }

        let changed = self
            .store
            .update_deployment_status(
                &d.deployment_id,
                StatusUpdate {
                    from: Some(d.status),
                    to: next.to,
                    last_error: next.error,
                    failure_increment: next.increment,
                    at_ms: now_ms(),
                },
            )
            .await?;
        if changed && next.to != d.status {
            info!(
                deployment_id = %d.deployment_id,
                from = ?d.status,
                to = ?next.to,
                "deployment status advanced"
            );
        }
        Ok(())
    }

    /// The 30 s reconcile loop. Single sweep in flight.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "deployment reconciler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("deployment reconciler stopped");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }
            if let Err(e) = self.reconcile_once().await {
                warn!(error = %e, "reconcile sweep failed");
            }
        }
    }
}

enum Observation {
    Phase {
        phase: DeploymentStatus,
        pod_failed: bool,
        error: Option<String>,
    },
    Gone,
    Unobservable(ErrorKind),
}

struct Transition {
    to: DeploymentStatus,
    error: Option<String>,
    increment: bool,
}
