use chrono::Utc;
use tracing::{info, warn};

use gauntlet_common::ErrorKind;
use gauntlet_source::SourceClient;

use crate::registry::{ModelVersion, RegistryClient};

/// Placeholder substitutions for the application template.
#[derive(Debug, Clone)]
pub struct Substitutions {
    pub run_id: String,
    pub experiment_id: String,
    pub timestamp: String,
    pub model_name: String,
    pub model_version: String,
}

impl Substitutions {
    pub fn stamp_now(run_id: &str, experiment_id: &str, mv: &ModelVersion) -> Self {
        Self {
            run_id: run_id.to_string(),
            experiment_id: experiment_id.to_string(),
            timestamp: Utc::now().format("%Y%m%d-%H%M%S").to_string(),
            model_name: mv.model_name.clone(),
            model_version: mv.version.clone(),
        }
    }
}

/// Fill the template's `{placeholder}` slots.
pub fn render_application(template: &str, sub: &Substitutions) -> String {
    template
        .replace("{run_id}", &sub.run_id)
        .replace("{experiment_id}", &sub.experiment_id)
        .replace("{timestamp}", &sub.timestamp)
        .replace("{model_name}", &sub.model_name)
        .replace("{model_version}", &sub.model_version)
}

/// Rewrite the `global` block of a mirrored file in place. Returns `None`
/// when the stored model name and version already match, so unchanged
/// models never produce a commit.
pub fn update_global_block(
    yaml: &str,
    sub: &Substitutions,
) -> Result<Option<String>, ErrorKind> {
    let mut doc: serde_yaml::Value = serde_yaml::from_str(yaml)
        .map_err(|e| ErrorKind::Invalid(format!("mirrored file is not yaml: {e}")))?;

    let current_name = doc
        .get("global")
        .and_then(|g| g.get("modelName"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let current_version = doc
        .get("global")
        .and_then(|g| g.get("modelVersion"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if current_name == sub.model_name && current_version == sub.model_version {
        return Ok(None);
    }

    let mapping = doc
        .as_mapping_mut()
        .ok_or_else(|| ErrorKind::Invalid("mirrored file is not a mapping".to_string()))?;
    let global_key = serde_yaml::Value::String("global".to_string());
    if !mapping.contains_key(&global_key) {
        mapping.insert(
            global_key.clone(),
            serde_yaml::Value::Mapping(Default::default()),
        );
    }
    let global = mapping
        .get_mut(&global_key)
        .and_then(|g| g.as_mapping_mut())
        .ok_or_else(|| ErrorKind::Invalid("global block is not a mapping".to_string()))?;

    let mut set = |key: &str, value: &str| {
        global.insert(
            serde_yaml::Value::String(key.to_string()),
            serde_yaml::Value::String(value.to_string()),
        );
    };
    set("runid", &sub.run_id);
    set("experimentId", &sub.experiment_id);
    set("timestamp", &sub.timestamp);
    set("modelName", &sub.model_name);
    set("modelVersion", &sub.model_version);

    serde_yaml::to_string(&doc)
        .map(Some)
        .map_err(|e| ErrorKind::Invalid(format!("updated file unserializable: {e}")))
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct PollStats {
    pub seen: usize,
    pub mirrored: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// One-way mirror from the model registry into the versioned source.
///
/// Mirror state is the source repository itself: a file at
/// `applications/{run_id}.yaml` means "already mirrored". No local state.
pub struct Bridge {
    registry: RegistryClient,
    source: SourceClient,
    owner: String,
    repo: String,
    branch: String,
    template_path: String,
    applications_dir: String,
}

impl Bridge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: RegistryClient,
        source: SourceClient,
        owner: String,
        repo: String,
        branch: String,
        template_path: String,
        applications_dir: String,
    ) -> Self {
        Self {
            registry,
            source,
            owner,
            repo,
            branch,
            template_path,
            applications_dir,
        }
    }

    pub async fn poll_once(&self) -> anyhow::Result<PollStats> {
        let versions = self
            .registry
            .latest_model_versions()
            .await
            .map_err(|e| anyhow::anyhow!(e))?;

        let mut stats = PollStats {
            seen: versions.len(),
            ..Default::default()
        };

        for mv in &versions {
            if let Err(e) = self.mirror_one(mv, &mut stats).await {
                warn!(model = %mv.model_name, run_id = %mv.run_id, error = %e, "mirror failed");
            }
        }

        info!(
            seen = stats.seen,
            mirrored = stats.mirrored,
            updated = stats.updated,
            unchanged = stats.unchanged,
            "registry poll finished"
        );
        Ok(stats)
    }

    async fn mirror_one(&self, mv: &ModelVersion, stats: &mut PollStats) -> anyhow::Result<()> {
        let path = format!("{}/{}.yaml", self.applications_dir, mv.run_id);
        let existing = self
            .source
            .fetch_file_optional(&self.owner, &self.repo, &path, &self.branch)
            .await
            .map_err(|e| anyhow::anyhow!(e.error_kind()))?;

        let experiment_id = self
            .registry
            .experiment_id(&mv.run_id)
            .await
            .unwrap_or_else(|_| "1".to_string());
        let sub = Substitutions::stamp_now(&mv.run_id, &experiment_id, mv);

        match existing {
            None => {
                let template = self
                    .source
                    .fetch_file(&self.owner, &self.repo, &self.template_path, &self.branch)
                    .await
                    .map_err(|e| anyhow::anyhow!(e.error_kind()))?;
                let rendered = render_application(&template.content, &sub);
                self.source
                    .put_file(
                        &self.owner,
                        &self.repo,
                        &path,
                        &self.branch,
                        &format!("Add application for {} v{}", mv.model_name, mv.version),
                        &rendered,
                        None,
                    )
                    .await
                    .map_err(|e| anyhow::anyhow!(e.error_kind()))?;
                info!(model = %mv.model_name, run_id = %mv.run_id, "application mirrored");
                stats.mirrored += 1;
            }
            Some(file) => match update_global_block(&file.content, &sub) {
                Ok(Some(updated)) => {
                    self.source
                        .put_file(
                            &self.owner,
                            &self.repo,
                            &path,
                            &self.branch,
                            &format!("Update {} to v{}", mv.model_name, mv.version),
                            &updated,
                            Some(&file.sha),
                        )
                        .await
                        .map_err(|e| anyhow::anyhow!(e.error_kind()))?;
                    info!(model = %mv.model_name, run_id = %mv.run_id, "application updated");
                    stats.updated += 1;
                }
                Ok(None) => stats.unchanged += 1,
                Err(kind) => return Err(anyhow::anyhow!(kind)),
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub() -> Substitutions {
        Substitutions {
            run_id: "r123".to_string(),
            experiment_id: "7".to_string(),
            timestamp: "20260802-120000".to_string(),
            model_name: "Qwen/Qwen3-0.6B".to_string(),
            model_version: "3".to_string(),
        }
    }

    #[test]
    fn test_render_application() {
        let template = "global:\n  runid: \"{run_id}\"\n  modelName: \"{model_name}\"\n  modelVersion: \"{model_version}\"\n  experimentId: \"{experiment_id}\"\n  timestamp: \"{timestamp}\"\n";
        let rendered = render_application(template, &sub());
        assert!(rendered.contains("runid: \"r123\""));
        assert!(rendered.contains("modelName: \"Qwen/Qwen3-0.6B\""));
        assert!(rendered.contains("modelVersion: \"3\""));
        assert!(!rendered.contains('{'));
    }

    #[test]
    fn test_update_global_block_on_version_change() {
        let existing = "global:\n  runid: r123\n  modelName: Qwen/Qwen3-0.6B\n  modelVersion: \"2\"\nvllm:\n  replicas: 1\n";
        let updated = update_global_block(existing, &sub()).unwrap().unwrap();

        let doc: serde_yaml::Value = serde_yaml::from_str(&updated).unwrap();
        assert_eq!(doc["global"]["modelVersion"], "3");
        assert_eq!(doc["global"]["modelName"], "Qwen/Qwen3-0.6B");
        // Sibling blocks survive the rewrite.
        assert_eq!(doc["vllm"]["replicas"], 1);
    }

    #[test]
    fn test_update_global_block_unchanged_is_none() {
        let existing = "global:\n  modelName: Qwen/Qwen3-0.6B\n  modelVersion: \"3\"\n";
        assert!(update_global_block(existing, &sub()).unwrap().is_none());
    }

    #[test]
    fn test_update_global_block_creates_missing_block() {
        let existing = "vllm:\n  replicas: 1\n";
        let updated = update_global_block(existing, &sub()).unwrap().unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&updated).unwrap();
        assert_eq!(doc["global"]["runid"], "r123");
    }
}
