use serde_json::{json, Value};

use gauntlet_common::{ArgValue, VllmConfig};

/// DNS-1035 sanitization for names derived from model ids: lowercase
/// alphanumerics and hyphens, starts with a letter, at most 63 chars.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_hyphen = false;
    for c in name.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_hyphen = false;
        } else if !last_hyphen && !out.is_empty() {
            out.push('-');
            last_hyphen = true;
        }
    }
    let mut out = out.trim_matches('-').to_string();
    if out.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        out = format!("v{out}");
    }
    if out.is_empty() {
        out = "model".to_string();
    }
    out.truncate(63);
    out.trim_end_matches('-').to_string()
}

/// Stable workload name for one config: model plus the knobs that change
/// its resource shape, so a re-submission of the same config lands on the
/// same StatefulSet.
pub fn statefulset_name(config: &VllmConfig) -> String {
    sanitize_name(&format!(
        "vllm-{}-{}-{}-{}",
        config.model_name,
        config.tensor_parallel_size,
        config.gpu_resource_type,
        config.gpu_resource_count
    ))
}

/// The vLLM server argv, canonically ordered. Boolean extras render as
/// bare flags; false booleans are omitted entirely.
pub fn build_args(config: &VllmConfig) -> Vec<String> {
    let mut args = vec![
        "--model".to_string(),
        config.model_name.clone(),
        "--gpu-memory-utilization".to_string(),
        config.gpu_memory_utilization.to_string(),
        "--max-num-seqs".to_string(),
        config.max_num_seqs.to_string(),
        "--block-size".to_string(),
        config.block_size.to_string(),
        "--tensor-parallel-size".to_string(),
        config.tensor_parallel_size.to_string(),
        "--pipeline-parallel-size".to_string(),
        config.pipeline_parallel_size.to_string(),
        "--dtype".to_string(),
        config.dtype.clone(),
        "--port".to_string(),
        config.port.to_string(),
        "--host".to_string(),
        config.host.clone(),
    ];

    if config.trust_remote_code {
        args.push("--trust-remote-code".to_string());
    }
    if let Some(len) = config.max_model_len {
        args.push("--max-model-len".to_string());
        args.push(len.to_string());
    }
    if let Some(q) = &config.quantization {
        args.push("--quantization".to_string());
        args.push(q.clone());
    }
    if let Some(name) = &config.served_model_name {
        args.push("--served-model-name".to_string());
        args.push(name.clone());
    }

    for (key, value) in &config.additional_args {
        match value {
            ArgValue::Bool(true) => args.push(format!("--{key}")),
            ArgValue::Bool(false) => {}
            other => {
                args.push(format!("--{key}"));
                args.push(other.canonical());
            }
        }
    }

    args
}

/// CPU/memory scale with tensor parallelism; the extended GPU resource is
/// requested verbatim when the config asks for one.
fn resource_requirements(config: &VllmConfig) -> Value {
    let cpu_m = 4000 * config.tensor_parallel_size.max(1);
    let mut memory_gi = 16 * config.tensor_parallel_size.max(1);
    if config.max_num_seqs > 64 {
        memory_gi = (memory_gi as f64 * (config.max_num_seqs as f64 / 64.0).max(1.5)) as i64;
    }

    let mut requests = json!({
        "cpu": format!("{cpu_m}m"),
        "memory": format!("{memory_gi}Gi"),
    });
    if config.gpu_resource_count > 0 && config.gpu_resource_type != "cpu" {
        requests[&config.gpu_resource_type] = json!(config.gpu_resource_count.to_string());
    }

    let limits = requests.clone();
    json!({"requests": requests, "limits": limits})
}

fn labels(config: &VllmConfig, deployment_id: &str) -> Value {
    json!({
        "app": "vllm",
        "deployment-id": deployment_id,
        "model": sanitize_name(&config.model_name),
    })
}

pub fn render_statefulset(
    name: &str,
    config: &VllmConfig,
    deployment_id: &str,
    namespace: &str,
    image: &str,
) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "StatefulSet",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": labels(config, deployment_id),
        },
        "spec": {
            "serviceName": format!("{name}-headless"),
            "replicas": 1,
            "selector": {
                "matchLabels": {"app": "vllm", "deployment-id": deployment_id}
            },
            "template": {
                "metadata": {"labels": labels(config, deployment_id)},
                "spec": {
                    "containers": [{
                        "name": "vllm",
                        "image": image,
                        "args": build_args(config),
                        "ports": [{"containerPort": config.port, "name": "http"}],
                        "resources": resource_requirements(config),
                        "readinessProbe": {
                            "httpGet": {"path": "/health", "port": config.port},
                            "initialDelaySeconds": 30,
                            "periodSeconds": 10,
                            "timeoutSeconds": 5,
                            "failureThreshold": 3,
                        },
                        "livenessProbe": {
                            "httpGet": {"path": "/health", "port": config.port},
                            "initialDelaySeconds": 60,
                            "periodSeconds": 30,
                            "timeoutSeconds": 10,
                            "failureThreshold": 3,
                        },
                    }],
                    "restartPolicy": "Always",
                    "terminationGracePeriodSeconds": 30,
                }
            }
        }
    })
}

pub fn render_service(
    name: &str,
    deployment_id: &str,
    port: u16,
    namespace: &str,
    headless: bool,
) -> Value {
    let mut spec = json!({
        "ports": [{"port": port, "targetPort": port, "protocol": "TCP", "name": "http"}],
        "selector": {"app": "vllm", "deployment-id": deployment_id},
    });
    if headless {
        spec["clusterIP"] = json!("None");
    }
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": {"app": "vllm", "deployment-id": deployment_id},
        },
        "spec": spec,
    })
}

/// The full manifest trio as one multi-document YAML string, StatefulSet
/// first so it drives the tracked status.
pub fn render_manifests(
    config: &VllmConfig,
    deployment_id: &str,
    namespace: &str,
    image: &str,
) -> (String, String, String) {
    let set_name = statefulset_name(config);
    let service_name = format!("{set_name}-service");
    let headless_name = format!("{set_name}-headless");

    let docs = [
        render_statefulset(&set_name, config, deployment_id, namespace, image),
        render_service(&headless_name, deployment_id, config.port, namespace, true),
        render_service(&service_name, deployment_id, config.port, namespace, false),
    ];
    let yaml = docs
        .iter()
        .map(|d| serde_yaml::to_string(d).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("---\n");

    (yaml, set_name, service_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn make_config(model: &str) -> VllmConfig {
        serde_json::from_value(json!({
            "model_name": model,
            "gpu_resource_type": "nvidia.com/gpu",
            "gpu_resource_count": 1,
        }))
        .unwrap()
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(
            sanitize_name("microsoft/DialoGPT-medium"),
            "microsoft-dialogpt-medium"
        );
        assert_eq!(sanitize_name("Qwen/Qwen2.5-0.5B"), "qwen-qwen2-5-0-5b");
        assert_eq!(sanitize_name("7b-chat"), "v7b-chat");
        assert_eq!(sanitize_name("///"), "model");
    }

    #[test]
    fn test_statefulset_name_stable_for_same_config() {
        let a = make_config("microsoft/DialoGPT-medium");
        let b = make_config("microsoft/DialoGPT-medium");
        assert_eq!(statefulset_name(&a), statefulset_name(&b));
        assert!(statefulset_name(&a).starts_with("vllm-microsoft-dialogpt-medium"));
    }

    #[test]
    fn test_build_args_flags_and_values() {
        let mut config = make_config("m");
        config.trust_remote_code = true;
        config.quantization = Some("awq".to_string());
        config.additional_args = BTreeMap::from([
            ("enforce-eager".to_string(), ArgValue::Bool(true)),
            ("swap-space".to_string(), ArgValue::Int(4)),
            ("enable-lora".to_string(), ArgValue::Bool(false)),
        ]);

        let args = build_args(&config);
        let joined = args.join(" ");
        assert!(joined.contains("--model m"));
        assert!(joined.contains("--trust-remote-code"));
        assert!(joined.contains("--quantization awq"));
        assert!(joined.contains("--enforce-eager"));
        assert!(joined.contains("--swap-space 4"));
        assert!(!joined.contains("--enable-lora"));
        // Bare flag, not "--enforce-eager true".
        assert!(!joined.contains("--enforce-eager true"));
    }

    #[test]
    fn test_gpu_resources_requested() {
        let config = make_config("m");
        let resources = resource_requirements(&config);
        assert_eq!(resources["requests"]["nvidia.com/gpu"], json!("1"));
        assert_eq!(resources["limits"]["nvidia.com/gpu"], json!("1"));
    }

    #[test]
    fn test_cpu_config_requests_no_gpu() {
        let config: VllmConfig = serde_json::from_value(json!({"model_name": "m"})).unwrap();
        let resources = resource_requirements(&config);
        assert!(resources["requests"].get("cpu").is_some());
        assert!(resources["requests"].get("nvidia.com/gpu").is_none());
    }

    #[test]
    fn test_render_manifests_trio() {
        let config = make_config("microsoft/DialoGPT-medium");
        let (yaml, set_name, service_name) = render_manifests(&config, "dep-1", "vllm", "vllm/vllm-openai:latest");

        let docs: Vec<serde_yaml::Value> = serde_yaml::Deserializer::from_str(&yaml)
            .map(|d| serde::Deserialize::deserialize(d).unwrap())
            .collect();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0]["kind"], "StatefulSet");
        assert_eq!(docs[0]["metadata"]["name"], set_name.as_str());
        assert_eq!(docs[1]["spec"]["clusterIP"], "None");
        assert_eq!(docs[2]["metadata"]["name"], service_name.as_str());
        assert_eq!(
            docs[0]["metadata"]["labels"]["deployment-id"],
            "dep-1"
        );
    }
}
