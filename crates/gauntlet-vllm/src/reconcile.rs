use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gauntlet_common::{now_ms, DeploymentStatus, ErrorKind, VllmDeployment};
use gauntlet_kube::ClusterGateway;
use gauntlet_store::{StatusUpdate, Store};

/// Status reconciliation for vLLM deployments. Same shape as the generic
/// deployment reconciler, with the stricter vLLM failure budget.
pub struct VllmReconciler {
    store: Arc<dyn Store>,
    gateway: ClusterGateway,
    max_failures: u32,
}

impl VllmReconciler {
    pub fn new(store: Arc<dyn Store>, gateway: ClusterGateway, max_failures: u32) -> Self {
        Self {
            store,
            gateway,
            max_failures,
        }
    }

    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "vllm reconciler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("vllm reconciler stopped");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }
            if let Err(e) = self.reconcile_once().await {
                warn!(error = %e, "vllm reconcile sweep failed");
            }
        }
    }

    pub async fn reconcile_once(&self) -> anyhow::Result<()> {
        for d in self.store.list_active_vllm_deployments().await? {
            if let Err(e) = self.reconcile_deployment(&d).await {
                warn!(deployment_id = %d.deployment_id, error = %e, "vllm reconcile failed");
            }
        }
        Ok(())
    }

    async fn reconcile_deployment(&self, d: &VllmDeployment) -> anyhow::Result<()> {
        let snapshot = match self
            .gateway
            .statefulset_status(&d.namespace, &d.statefulset_name)
            .await
        {
            Ok(s) => s,
            Err(ErrorKind::NotFound(_)) => {
                self.store
                    .update_vllm_status(
                        &d.deployment_id,
                        StatusUpdate {
                            from: Some(d.status),
                            to: DeploymentStatus::Deleted,
                            last_error: Some("statefulset disappeared from cluster".to_string()),
                            failure_increment: false,
                            at_ms: now_ms(),
                        },
                    )
                    .await?;
                return Ok(());
            }
            Err(kind) => {
                warn!(deployment_id = %d.deployment_id, error = %kind, "vllm status unobservable");
                return Ok(());
            }
        };

        // Pod-level failures (crash loops, eviction) don't show in replica
        // counters; read them off the labeled pods.
        let selector = format!("deployment-id={}", d.deployment_id);
        let pod_error = self
            .gateway
            .labeled_pods(&d.namespace, &selector)
            .await
            .ok()
            .and_then(|pods| pods.iter().find_map(|p| p.failure_message.clone()));

        let pod_failed = pod_error.is_some();
        let exhausted = pod_failed && d.failure_count + 1 >= self.max_failures;

        let next = if exhausted {
            DeploymentStatus::Failed
        } else {
            snapshot.phase()
        };

        if next == d.status && !pod_failed {
            return Ok(());
        }
        if next != d.status && !d.status.can_transition_to(next) {
            return Ok(());
        }

        let changed = self
            .store
            .update_vllm_status(
                &d.deployment_id,
                StatusUpdate {
                    from: Some(d.status),
                    to: next,
                    last_error: pod_error,
                    failure_increment: pod_failed,
                    at_ms: now_ms(),
                },
            )
            .await?;
        if changed && next != d.status {
            info!(
                deployment_id = %d.deployment_id,
                from = ?d.status,
                to = ?next,
                "vllm deployment status advanced"
            );
        }
        Ok(())
    }
}
