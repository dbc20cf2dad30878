use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::DeploymentStatus;

/// A loosely typed argument value accepted at the API boundary.
///
/// Canonicalized to a string before fingerprinting so that `1`, `1.0` and
/// `"1"` from different clients cannot produce distinct fingerprints for
/// the same effective vLLM invocation. Booleans stay `true`/`false`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ArgValue {
    /// Canonical string form. Whole floats collapse to integers.
    pub fn canonical(&self) -> String {
        match self {
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Int(i) => i.to_string(),
            ArgValue::Float(f) => {
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            ArgValue::Str(s) => s.clone(),
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, ArgValue::Bool(true))
    }
}

fn default_max_num_seqs() -> i64 {
    2
}
fn default_block_size() -> i64 {
    16
}
fn default_parallel() -> i64 {
    1
}
fn default_dtype() -> String {
    "float32".to_string()
}
fn default_max_model_len() -> Option<i64> {
    Some(512)
}
fn default_served_model_name() -> Option<String> {
    Some("test-model-cpu".to_string())
}
fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_gpu_resource_type() -> String {
    "cpu".to_string()
}

fn default_additional_args() -> BTreeMap<String, ArgValue> {
    let mut args = BTreeMap::new();
    args.insert("disable-log-stats".to_string(), ArgValue::Bool(true));
    args.insert("disable-log-requests".to_string(), ArgValue::Bool(true));
    args.insert("enforce-eager".to_string(), ArgValue::Bool(true));
    args.insert("disable-custom-all-reduce".to_string(), ArgValue::Bool(true));
    args
}

/// Strict inference-server configuration. Unknown keys are rejected at the
/// boundary, not deep inside the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct VllmConfig {
    pub model_name: String,

    #[serde(default)]
    pub gpu_memory_utilization: f64,
    #[serde(default = "default_max_num_seqs")]
    pub max_num_seqs: i64,
    #[serde(default = "default_block_size")]
    pub block_size: i64,
    #[serde(default = "default_parallel")]
    pub tensor_parallel_size: i64,
    #[serde(default = "default_parallel")]
    pub pipeline_parallel_size: i64,
    #[serde(default)]
    pub trust_remote_code: bool,
    #[serde(default = "default_dtype")]
    pub dtype: String,
    #[serde(default = "default_max_model_len")]
    pub max_model_len: Option<i64>,
    #[serde(default)]
    pub quantization: Option<String>,
    #[serde(default = "default_served_model_name")]
    pub served_model_name: Option<String>,

    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,

    /// Extended resource name requested from the cluster, e.g.
    /// `nvidia.com/gpu` or a MIG slice such as `nvidia.com/mig-3g.20gb`.
    #[serde(default = "default_gpu_resource_type")]
    pub gpu_resource_type: String,
    #[serde(default)]
    pub gpu_resource_count: i64,

    #[serde(default = "default_additional_args")]
    pub additional_args: BTreeMap<String, ArgValue>,
}

impl VllmConfig {
    pub fn fingerprint(&self) -> ConfigFingerprint {
        ConfigFingerprint {
            model_name: self.model_name.clone(),
            gpu_resource_type: self.gpu_resource_type.clone(),
            gpu_resource_count: self.gpu_resource_count,
            gpu_memory_utilization: self.gpu_memory_utilization.to_bits(),
            max_num_seqs: self.max_num_seqs,
            block_size: self.block_size,
            tensor_parallel_size: self.tensor_parallel_size,
            pipeline_parallel_size: self.pipeline_parallel_size,
            trust_remote_code: self.trust_remote_code,
            dtype: self.dtype.clone(),
            max_model_len: self.max_model_len,
            quantization: self.quantization.clone(),
            served_model_name: self.served_model_name.clone(),
            additional_args: self
                .additional_args
                .iter()
                .map(|(k, v)| (k.clone(), v.canonical()))
                .collect(),
        }
    }
}

/// The canonical identity tuple for an inference-server deployment.
///
/// Value equality over every field decides reuse; GPU conflict is decided
/// by [`ConfigFingerprint::gpu_conflicts_with`] alone. `additional_args`
/// is key-sorted with canonical string values, so key order and numeric
/// encoding on the wire cannot influence identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigFingerprint {
    pub model_name: String,
    pub gpu_resource_type: String,
    pub gpu_resource_count: i64,
    /// Bit pattern of the f64 so the fingerprint stays `Eq`/hashable.
    pub gpu_memory_utilization: u64,
    pub max_num_seqs: i64,
    pub block_size: i64,
    pub tensor_parallel_size: i64,
    pub pipeline_parallel_size: i64,
    pub trust_remote_code: bool,
    pub dtype: String,
    pub max_model_len: Option<i64>,
    pub quantization: Option<String>,
    pub served_model_name: Option<String>,
    pub additional_args: BTreeMap<String, String>,
}

impl ConfigFingerprint {
    /// Two fingerprints conflict iff both request more than zero units of
    /// the *exact same* extended resource. A MIG slice only conflicts with
    /// the identical slice type; distinct slices coexist.
    pub fn gpu_conflicts_with(&self, other: &ConfigFingerprint) -> bool {
        self.gpu_resource_count > 0
            && other.gpu_resource_count > 0
            && self.gpu_resource_type == other.gpu_resource_type
    }
}

/// Persisted record of one inference-server deployment (the `Deployment`
/// specialization carrying a config fingerprint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VllmDeployment {
    pub deployment_id: String,
    pub config: VllmConfig,
    pub statefulset_name: String,
    pub service_name: String,
    pub namespace: String,
    pub status: DeploymentStatus,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn make_config(model: &str, gpu_type: &str, count: i64) -> VllmConfig {
        VllmConfig {
            model_name: model.to_string(),
            gpu_memory_utilization: 0.9,
            max_num_seqs: 2,
            block_size: 16,
            tensor_parallel_size: 1,
            pipeline_parallel_size: 1,
            trust_remote_code: false,
            dtype: "float16".to_string(),
            max_model_len: Some(512),
            quantization: None,
            served_model_name: Some("m".to_string()),
            port: 8000,
            host: "0.0.0.0".to_string(),
            gpu_resource_type: gpu_type.to_string(),
            gpu_resource_count: count,
            additional_args: default_additional_args(),
        }
    }

    #[test]
    fn test_fingerprint_equality_ignores_arg_encoding() {
        let mut a = make_config("microsoft/DialoGPT-medium", "nvidia.com/gpu", 1);
        let mut b = a.clone();
        a.additional_args
            .insert("max-log-len".to_string(), ArgValue::Int(1));
        b.additional_args
            .insert("max-log-len".to_string(), ArgValue::Float(1.0));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_inequality_on_model() {
        let a = make_config("model-a", "nvidia.com/gpu", 1);
        let b = make_config("model-b", "nvidia.com/gpu", 1);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_absent_fields_only_equal_absent() {
        let a = make_config("m", "nvidia.com/gpu", 1);
        let mut b = a.clone();
        b.quantization = Some("awq".to_string());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_gpu_conflict_exact_type() {
        let a = make_config("a", "nvidia.com/gpu", 1).fingerprint();
        let b = make_config("b", "nvidia.com/gpu", 1).fingerprint();
        assert!(a.gpu_conflicts_with(&b));
    }

    #[test]
    fn test_mig_slices_do_not_conflict() {
        let a = make_config("a", "nvidia.com/mig-3g.20gb", 1).fingerprint();
        let b = make_config("b", "nvidia.com/mig-4g.24gb", 1).fingerprint();
        assert!(!a.gpu_conflicts_with(&b));

        let c = make_config("c", "nvidia.com/mig-3g.20gb", 1).fingerprint();
        assert!(a.gpu_conflicts_with(&c));
    }

    #[test]
    fn test_zero_count_never_conflicts() {
        let cpu_a = make_config("a", "cpu", 0).fingerprint();
        let cpu_b = make_config("b", "cpu", 0).fingerprint();
        assert!(!cpu_a.gpu_conflicts_with(&cpu_b));
    }

    #[test]
    fn test_canonical_values() {
        assert_eq!(ArgValue::Bool(true).canonical(), "true");
        assert_eq!(ArgValue::Int(8).canonical(), "8");
        assert_eq!(ArgValue::Float(8.0).canonical(), "8");
        assert_eq!(ArgValue::Float(0.85).canonical(), "0.85");
        assert_eq!(ArgValue::Str("fp8".to_string()).canonical(), "fp8");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let raw = serde_json::json!({
            "model_name": "m",
            "gpu_resource_type": "nvidia.com/gpu",
            "gpu_resource_count": 1,
            "no_such_knob": true,
        });
        assert!(serde_json::from_value::<VllmConfig>(raw).is_err());
    }
}
