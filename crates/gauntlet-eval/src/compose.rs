use serde_yaml::{Mapping, Value};

use gauntlet_common::ErrorKind;

/// Env var the benchmark harness reads to find its model.
pub const MODEL_ENDPOINT_ENV: &str = "VLLM_MODEL_ENDPOINT";

/// Where the evaluation config lands inside the job container.
pub const CONFIG_MOUNT_PATH: &str = "/app/configs/eval_config.json";
const CONFIG_KEY: &str = "eval_config.json";
const CONFIG_VOLUME: &str = "eval-config";

/// A ready-to-submit manifest bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    /// Job first, ConfigMap (when present) second.
    pub yaml: String,
    pub job_name: String,
}

fn str_key(key: &str) -> Value {
    Value::String(key.to_string())
}

fn get_or_insert_seq<'a>(map: &'a mut Mapping, key: &str) -> Result<&'a mut Vec<Value>, ErrorKind> {
    if !map.contains_key(&str_key(key)) {
        map.insert(str_key(key), Value::Sequence(Vec::new()));
    }
    map.get_mut(&str_key(key))
        .and_then(|v| v.as_sequence_mut())
        .ok_or_else(|| ErrorKind::Invalid(format!("job manifest field {key} is not a list")))
}

fn pod_spec(job: &mut Value) -> Result<&mut Mapping, ErrorKind> {
    job.get_mut("spec")
        .and_then(|s| s.get_mut("template"))
        .and_then(|t| t.get_mut("spec"))
        .and_then(|s| s.as_mapping_mut())
        .ok_or_else(|| {
            ErrorKind::Invalid("job manifest missing spec.template.spec".to_string())
        })
}

/// Build the submission for one evaluation run:
/// - inject `VLLM_MODEL_ENDPOINT` into the job's first container,
/// - when a config is given, mount it as a ConfigMap named
///   `{job-name}-eval-config` at the fixed path, appending the ConfigMap
///   document after the Job.
///
/// The job must be a single batch/v1 Job document.
pub fn compose_submission(
    job_yaml: &str,
    config_json: Option<&str>,
    model_endpoint: &str,
) -> Result<Composition, ErrorKind> {
    let mut job: Value = serde_yaml::from_str(job_yaml)
        .map_err(|e| ErrorKind::Invalid(format!("job is not valid yaml: {e}")))?;

    if job.get("kind").and_then(|k| k.as_str()) != Some("Job")
        || job.get("apiVersion").and_then(|v| v.as_str()) != Some("batch/v1")
    {
        return Err(ErrorKind::Invalid(
            "job file must be a single batch/v1 Job manifest".to_string(),
        ));
    }
    let job_name = job
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(|n| n.as_str())
        .ok_or_else(|| ErrorKind::Invalid("job manifest missing metadata.name".to_string()))?
        .to_string();

    let configmap_name = format!("{job_name}-eval-config");

    // Env injection into the first container.
    {
        let spec = pod_spec(&mut job)?;
        let containers = spec
            .get_mut(&str_key("containers"))
            .and_then(|c| c.as_sequence_mut())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ErrorKind::Invalid("job has no containers".to_string()))?;
        let first = containers[0]
            .as_mapping_mut()
            .ok_or_else(|| ErrorKind::Invalid("container is not a mapping".to_string()))?;

        let env = get_or_insert_seq(first, "env")?;
        env.push(serde_yaml::to_value(serde_json::json!({
            "name": MODEL_ENDPOINT_ENV,
            "value": model_endpoint,
        }))
        .expect("static env entry"));

        if config_json.is_some() {
            let mounts = get_or_insert_seq(first, "volumeMounts")?;
            mounts.push(
                serde_yaml::to_value(serde_json::json!({
                    "name": CONFIG_VOLUME,
                    "mountPath": CONFIG_MOUNT_PATH,
                    "subPath": CONFIG_KEY,
                }))
                .expect("static mount entry"),
            );
        }
    }

    if config_json.is_some() {
        let spec = pod_spec(&mut job)?;
        let volumes = get_or_insert_seq(spec, "volumes")?;
        volumes.push(
            serde_yaml::to_value(serde_json::json!({
                "name": CONFIG_VOLUME,
                "configMap": {"name": configmap_name},
            }))
            .expect("static volume entry"),
        );
    }

    let mut yaml = serde_yaml::to_string(&job)
        .map_err(|e| ErrorKind::Invalid(format!("composed job unserializable: {e}")))?;

    if let Some(config) = config_json {
        let configmap = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": configmap_name},
            "data": {CONFIG_KEY: config},
        });
        let configmap_yaml = serde_yaml::to_string(&configmap)
            .map_err(|e| ErrorKind::Invalid(format!("configmap unserializable: {e}")))?;
        yaml = format!("{yaml}---\n{configmap_yaml}");
    }

    Ok(Composition { yaml, job_name })
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: &str = r#"
apiVersion: batch/v1
kind: Job
metadata:
  name: mmlu-eval
spec:
  template:
    spec:
      restartPolicy: Never
      containers:
        - name: bench
          image: eval-harness:latest
          env:
            - name: EXISTING
              value: keep
        - name: sidecar
          image: busybox
"#;

    fn parse(yaml: &str) -> Vec<serde_yaml::Value> {
        serde_yaml::Deserializer::from_str(yaml)
            .map(|d| serde::Deserialize::deserialize(d).unwrap())
            .collect()
    }

    #[test]
    fn test_env_injected_into_first_container_only() {
        let c = compose_submission(JOB, None, "http://svc:8000").unwrap();
        let docs = parse(&c.yaml);
        assert_eq!(docs.len(), 1);

        let containers = &docs[0]["spec"]["template"]["spec"]["containers"];
        let env = containers[0]["env"].as_sequence().unwrap();
        assert_eq!(env[0]["name"], "EXISTING");
        assert_eq!(env[1]["name"], MODEL_ENDPOINT_ENV);
        assert_eq!(env[1]["value"], "http://svc:8000");

        assert!(containers[1].get("env").is_none());
    }

    #[test]
    fn test_config_mounted_as_configmap() {
        let c = compose_submission(JOB, Some(r#"{"k": 1}"#), "http://svc:8000").unwrap();
        let docs = parse(&c.yaml);
        assert_eq!(docs.len(), 2);
        assert_eq!(c.job_name, "mmlu-eval");

        // Job is the primary (first) document.
        assert_eq!(docs[0]["kind"], "Job");
        let mounts = docs[0]["spec"]["template"]["spec"]["containers"][0]["volumeMounts"]
            .as_sequence()
            .unwrap();
        assert_eq!(mounts[0]["mountPath"], CONFIG_MOUNT_PATH);

        let volumes = docs[0]["spec"]["template"]["spec"]["volumes"]
            .as_sequence()
            .unwrap();
        assert_eq!(volumes[0]["configMap"]["name"], "mmlu-eval-eval-config");

        assert_eq!(docs[1]["kind"], "ConfigMap");
        assert_eq!(docs[1]["metadata"]["name"], "mmlu-eval-eval-config");
        assert_eq!(docs[1]["data"]["eval_config.json"], r#"{"k": 1}"#);
    }

    #[test]
    fn test_no_config_no_volumes() {
        let c = compose_submission(JOB, None, "http://svc:8000").unwrap();
        let docs = parse(&c.yaml);
        assert!(docs[0]["spec"]["template"]["spec"].get("volumes").is_none());
        assert!(docs[0]["spec"]["template"]["spec"]["containers"][0]
            .get("volumeMounts")
            .is_none());
    }

    #[test]
    fn test_rejects_non_job_manifests() {
        let deployment = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: d\n";
        assert!(compose_submission(deployment, None, "http://svc:8000").is_err());

        let wrong_version = "apiVersion: batch/v2\nkind: Job\nmetadata:\n  name: j\n";
        assert!(compose_submission(wrong_version, None, "http://svc:8000").is_err());
    }

    #[test]
    fn test_rejects_job_without_containers() {
        let empty = r#"
apiVersion: batch/v1
kind: Job
metadata:
  name: j
spec:
  template:
    spec:
      containers: []
"#;
        assert!(compose_submission(empty, None, "http://svc:8000").is_err());
    }
}
