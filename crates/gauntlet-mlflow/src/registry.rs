use std::time::Duration;

use serde::Deserialize;

use gauntlet_common::ErrorKind;

/// One registered model version worth mirroring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelVersion {
    pub model_name: String,
    pub version: String,
    pub run_id: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    registered_models: Vec<RegisteredModel>,
}

#[derive(Debug, Deserialize)]
struct RegisteredModel {
    name: String,
    #[serde(default)]
    latest_versions: Vec<VersionEntry>,
}

#[derive(Debug, Deserialize)]
struct VersionEntry {
    version: String,
    #[serde(default)]
    run_id: String,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    run: RunEntry,
}

#[derive(Debug, Deserialize)]
struct RunEntry {
    info: RunInfo,
}

#[derive(Debug, Deserialize)]
struct RunInfo {
    experiment_id: String,
}

/// Read-only client for the model registry's REST API.
#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(tracking_uri: &str) -> Result<Self, ErrorKind> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ErrorKind::Fatal(format!("registry client: {e}")))?;
        Ok(Self {
            http,
            base_url: tracking_uri.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ErrorKind> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| ErrorKind::Transient(format!("registry unreachable: {e}")))?;
        if !resp.status().is_success() {
            return Err(ErrorKind::Upstream(format!(
                "registry returned {} for {path}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| ErrorKind::Upstream(format!("registry payload: {e}")))
    }

    /// Latest version of every registered model, skipping entries without
    /// a run id (nothing to key the mirror on).
    pub async fn latest_model_versions(&self) -> Result<Vec<ModelVersion>, ErrorKind> {
        let resp: SearchResponse = self
            .get_json("/api/2.0/mlflow/registered-models/search", &[])
            .await?;

        let mut out = Vec::new();
        for model in resp.registered_models {
            let latest = model
                .latest_versions
                .iter()
                .max_by_key(|v| v.version.parse::<u64>().unwrap_or(0));
            if let Some(v) = latest {
                if !v.run_id.is_empty() {
                    out.push(ModelVersion {
                        model_name: model.name.clone(),
                        version: v.version.clone(),
                        run_id: v.run_id.clone(),
                    });
                }
            }
        }
        Ok(out)
    }

    pub async fn experiment_id(&self, run_id: &str) -> Result<String, ErrorKind> {
        let resp: RunResponse = self
            .get_json("/api/2.0/mlflow/runs/get", &[("run_id", run_id)])
            .await?;
        Ok(resp.run.info.experiment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_response_parse_picks_latest() {
        let raw = r#"{
            "registered_models": [
                {
                    "name": "qwen",
                    "latest_versions": [
                        {"version": "2", "run_id": "r2"},
                        {"version": "10", "run_id": "r10"}
                    ]
                },
                {"name": "empty", "latest_versions": []}
            ]
        }"#;
        let resp: SearchResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.registered_models.len(), 2);

        let latest = resp.registered_models[0]
            .latest_versions
            .iter()
            .max_by_key(|v| v.version.parse::<u64>().unwrap_or(0))
            .unwrap();
        assert_eq!(latest.run_id, "r10");
    }
}
