use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use gauntlet_common::{
    now_ms, ConfigFingerprint, DeploymentStatus, ErrorKind, VllmConfig, VllmDeployment,
};
use gauntlet_kube::ClusterGateway;
use gauntlet_store::{StatusUpdate, Store};

use crate::templates;

/// Admission decision against the active vLLM set.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// An identical fingerprint is already pending or running.
    Reuse(String),
    /// No GPU conflict; deploy alongside the existing set.
    Admit,
    /// The candidate needs GPUs held by these deployments.
    EvictAndAdmit(Vec<String>),
}

/// Pure decision: reuse beats eviction, exact-type GPU conflicts name
/// their victims, anything else is admitted.
pub fn decide(candidate: &ConfigFingerprint, active: &[VllmDeployment]) -> Admission {
    for existing in active {
        if existing.config.fingerprint() == *candidate {
            return Admission::Reuse(existing.deployment_id.clone());
        }
    }

    let victims: Vec<String> = active
        .iter()
        .filter(|d| d.config.fingerprint().gpu_conflicts_with(candidate))
        .map(|d| d.deployment_id.clone())
        .collect();

    if victims.is_empty() {
        Admission::Admit
    } else {
        Admission::EvictAndAdmit(victims)
    }
}

/// Outcome of a deploy request after admission.
#[derive(Debug)]
pub enum DeployOutcome {
    Reused(VllmDeployment),
    Created {
        deployment: VllmDeployment,
        evicted: Vec<String>,
    },
}

/// Gates inference-server deployments. Admission runs under one global
/// lock so reuse/conflict decisions always see a consistent snapshot.
pub struct PlacementEngine {
    store: Arc<dyn Store>,
    gateway: ClusterGateway,
    admission: Mutex<()>,
    namespace: String,
    image: String,
    evict_timeout: Duration,
}

impl PlacementEngine {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: ClusterGateway,
        namespace: String,
        image: String,
        evict_timeout: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            admission: Mutex::new(()),
            namespace,
            image,
            evict_timeout,
        }
    }

    pub async fn deploy(&self, config: VllmConfig) -> Result<DeployOutcome, ErrorKind> {
        let _gate = self.admission.lock().await;

        let active = self
            .store
            .list_active_vllm_deployments()
            .await
            .map_err(|e| ErrorKind::Upstream(format!("store: {e}")))?;

        let fingerprint = config.fingerprint();
        let mut evicted = Vec::new();
        match decide(&fingerprint, &active) {
            Admission::Reuse(id) => {
                let existing = active
                    .into_iter()
                    .find(|d| d.deployment_id == id)
                    .ok_or_else(|| ErrorKind::Upstream(format!("deployment {id} vanished mid-admission")))?;
                info!(deployment_id = %existing.deployment_id, "reusing matching vllm deployment");
                return Ok(DeployOutcome::Reused(existing));
            }
            Admission::Admit => {}
            Admission::EvictAndAdmit(victims) => {
                info!(count = victims.len(), "evicting conflicting vllm deployments");
                for victim_id in victims {
                    let Some(victim) = active.iter().find(|d| d.deployment_id == victim_id) else {
                        continue;
                    };
                    self.evict(victim).await?;
                    evicted.push(victim_id);
                }
            }
        }

        let deployment_id = ulid::Ulid::new().to_string();
        let (yaml, set_name, service_name) =
            templates::render_manifests(&config, &deployment_id, &self.namespace, &self.image);

        let now = now_ms();
        let record = VllmDeployment {
            deployment_id: deployment_id.clone(),
            config,
            statefulset_name: set_name,
            service_name,
            namespace: self.namespace.clone(),
            status: DeploymentStatus::Pending,
            created_at_ms: now,
            updated_at_ms: now,
            failure_count: 0,
            last_error: None,
        };
        self.store
            .insert_vllm_deployment(&record)
            .await
            .map_err(|e| ErrorKind::Upstream(format!("store: {e}")))?;

        if let Err(kind) = self.gateway.apply(&yaml, &self.namespace).await {
            let _ = self
                .store
                .update_vllm_status(
                    &deployment_id,
                    StatusUpdate {
                        from: Some(DeploymentStatus::Pending),
                        to: DeploymentStatus::Failed,
                        last_error: Some(kind.to_string()),
                        failure_increment: true,
                        at_ms: now_ms(),
                    },
                )
                .await;
            return Err(kind);
        }

        info!(deployment_id = %record.deployment_id, name = %record.statefulset_name, "vllm deployment admitted");
        Ok(DeployOutcome::Created {
            deployment: record,
            evicted,
        })
    }

    /// Single-shot eviction: delete the victim's resources, wait until the
    /// StatefulSet is gone, mark the record deleted. A failure here rejects
    /// the whole submission; the caller retries.
    async fn evict(&self, victim: &VllmDeployment) -> Result<(), ErrorKind> {
        let (yaml, _, _) = templates::render_manifests(
            &victim.config,
            &victim.deployment_id,
            &victim.namespace,
            &self.image,
        );
        self.gateway.delete(&yaml, &victim.namespace).await?;

        let deadline = tokio::time::Instant::now() + self.evict_timeout;
        loop {
            match self
                .gateway
                .statefulset_status(&victim.namespace, &victim.statefulset_name)
                .await
            {
                Err(ErrorKind::NotFound(_)) => break,
                Err(kind) => {
                    warn!(deployment_id = %victim.deployment_id, error = %kind, "eviction status check failed");
                    return Err(ErrorKind::Upstream(format!(
                        "eviction of {} unverifiable: {kind}",
                        victim.deployment_id
                    )));
                }
                Ok(_) if tokio::time::Instant::now() >= deadline => {
                    return Err(ErrorKind::Upstream(format!(
                        "eviction of {} timed out",
                        victim.deployment_id
                    )));
                }
                Ok(_) => tokio::time::sleep(Duration::from_secs(2)).await,
            }
        }

        self.store
            .update_vllm_status(
                &victim.deployment_id,
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

        info!(deployment_id = %victim.deployment_id, "conflicting deployment evicted");
        Ok(())
    }

    /// User-requested delete of one vLLM deployment. Idempotent.
    pub async fn delete(&self, deployment_id: &str) -> Result<VllmDeployment, ErrorKind> {
        let record = self
            .store
            .get_vllm_deployment(deployment_id)
            .await
            .map_err(|e| ErrorKind::Upstream(format!("store: {e}")))?
            .ok_or_else(|| ErrorKind::NotFound(format!("vllm deployment {deployment_id}")))?;

        if record.status == DeploymentStatus::Deleted {
            return Ok(record);
        }

        let (yaml, _, _) = templates::render_manifests(
            &record.config,
            &record.deployment_id,
            &record.namespace,
            &self.image,
        );
        self.gateway.delete(&yaml, &record.namespace).await?;
        self.store
            .update_vllm_status(
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

        self.store
            .get_vllm_deployment(deployment_id)
            .await
            .map_err(|e| ErrorKind::Upstream(format!("store: {e}")))?
            .ok_or_else(|| ErrorKind::NotFound(format!("vllm deployment {deployment_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_deployment(id: &str, model: &str, gpu_type: &str, count: i64) -> VllmDeployment {
        let config: VllmConfig = serde_json::from_value(json!({
            "model_name": model,
            "gpu_resource_type": gpu_type,
            "gpu_resource_count": count,
        }))
        .unwrap();
        VllmDeployment {
            deployment_id: id.to_string(),
            statefulset_name: templates::statefulset_name(&config),
            service_name: "svc".to_string(),
            namespace: "vllm".to_string(),
            config,
            status: DeploymentStatus::Running,
            created_at_ms: 0,
            updated_at_ms: 0,
            failure_count: 0,
            last_error: None,
        }
    }

    fn fingerprint_of(model: &str, gpu_type: &str, count: i64) -> ConfigFingerprint {
        let config: VllmConfig = serde_json::from_value(json!({
            "model_name": model,
            "gpu_resource_type": gpu_type,
            "gpu_resource_count": count,
        }))
        .unwrap();
        config.fingerprint()
    }

    #[test]
    fn test_identical_config_reused() {
        let active = vec![make_deployment("d1", "microsoft/DialoGPT-medium", "nvidia.com/gpu", 1)];
        let candidate = fingerprint_of("microsoft/DialoGPT-medium", "nvidia.com/gpu", 1);
        assert_eq!(decide(&candidate, &active), Admission::Reuse("d1".to_string()));
    }

    #[test]
    fn test_reuse_is_idempotent() {
        let active = vec![make_deployment("d1", "m", "nvidia.com/gpu", 1)];
        let candidate = fingerprint_of("m", "nvidia.com/gpu", 1);
        assert_eq!(decide(&candidate, &active), Admission::Reuse("d1".to_string()));
        assert_eq!(decide(&candidate, &active), Admission::Reuse("d1".to_string()));
    }

    #[test]
    fn test_mig_slices_coexist() {
        let active = vec![make_deployment("d1", "a", "nvidia.com/mig-3g.20gb", 1)];
        let candidate = fingerprint_of("b", "nvidia.com/mig-4g.24gb", 1);
        assert_eq!(decide(&candidate, &active), Admission::Admit);
    }

    #[test]
    fn test_same_gpu_type_evicts() {
        let active = vec![
            make_deployment("d1", "model-a", "nvidia.com/gpu", 1),
            make_deployment("d2", "model-c", "nvidia.com/mig-3g.20gb", 1),
        ];
        let candidate = fingerprint_of("model-b", "nvidia.com/gpu", 1);
        assert_eq!(
            decide(&candidate, &active),
            Admission::EvictAndAdmit(vec!["d1".to_string()])
        );
    }

    #[test]
    fn test_cpu_only_configs_always_admit() {
        let active = vec![make_deployment("d1", "a", "cpu", 0)];
        let candidate = fingerprint_of("b", "cpu", 0);
        assert_eq!(decide(&candidate, &active), Admission::Admit);
    }

    #[test]
    fn test_reuse_wins_over_conflict() {
        // An identical deployment and a conflicting one: reuse, no eviction.
        let active = vec![
            make_deployment("d1", "model-a", "nvidia.com/gpu", 1),
            make_deployment("d2", "model-b", "nvidia.com/gpu", 1),
        ];
        let candidate = fingerprint_of("model-a", "nvidia.com/gpu", 1);
        assert_eq!(decide(&candidate, &active), Admission::Reuse("d1".to_string()));
    }
}
