use gauntlet_common::{ErrorKind, FileType};

/// Best-effort parse of a stored file. Callers use this as a lint hook;
/// the store itself never refuses a write based on it.
///
/// Jobs must be a single batch/v1 Job document; configs must be JSON.
pub fn parse_file(file_type: FileType, content: &str) -> Result<serde_json::Value, ErrorKind> {
    match file_type {
        FileType::Config => serde_json::from_str(content)
            .map_err(|e| ErrorKind::Invalid(format!("config is not valid json: {e}"))),
        FileType::Job => {
            let value: serde_yaml::Value = serde_yaml::from_str(content)
                .map_err(|e| ErrorKind::Invalid(format!("job is not valid yaml: {e}")))?;
            let kind = value.get("kind").and_then(|k| k.as_str());
            if kind != Some("Job") {
                return Err(ErrorKind::Invalid(format!(
                    "job manifest must have kind Job, got {kind:?}"
                )));
            }
            let api_version = value.get("apiVersion").and_then(|v| v.as_str());
            if api_version != Some("batch/v1") {
                return Err(ErrorKind::Invalid(format!(
                    "job manifest must be batch/v1, got {api_version:?}"
                )));
            }
            serde_json::to_value(&value)
                .map_err(|e| ErrorKind::Invalid(format!("job not representable: {e}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_must_be_json() {
        assert!(parse_file(FileType::Config, r#"{"batch_size": 8}"#).is_ok());
        assert!(parse_file(FileType::Config, "batch_size: 8").is_err());
    }

    #[test]
    fn test_job_must_be_batch_v1_job() {
        let ok = "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: j\n";
        assert!(parse_file(FileType::Job, ok).is_ok());

        let wrong_kind = "apiVersion: batch/v1\nkind: CronJob\nmetadata:\n  name: j\n";
        assert!(parse_file(FileType::Job, wrong_kind).is_err());

        let wrong_version = "apiVersion: batch/v2\nkind: Job\nmetadata:\n  name: j\n";
        assert!(parse_file(FileType::Job, wrong_version).is_err());
    }
}
