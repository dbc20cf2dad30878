use serde::{Deserialize, Serialize};

use crate::ErrorKind;

/// Minimum allowed per-project poll interval.
pub const MIN_POLL_INTERVAL_SECS: u64 = 10;

/// A named binding to a location in the external versioned source.
///
/// Stored in the `projects` collection. The poller never mutates a project
/// apart from `last_sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub project_id: String,
    pub name: String,

    /// Repository owner (user or org) in the external source.
    pub owner: String,
    pub repo: String,

    /// Branch or ref the poller reads from.
    #[serde(default = "default_ref")]
    pub git_ref: String,

    /// Folder holding evaluation config files.
    pub config_folder: String,
    /// Folder holding benchmark job manifests.
    pub job_folder: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Opaque reference to a stored credential (never the token itself).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_ref: Option<String>,

    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_ms: Option<u64>,
}

fn default_ref() -> String {
    "main".to_string()
}

fn default_poll_interval() -> u64 {
    60
}

impl Project {
    /// Boundary validation: folders must differ and the interval must be sane.
    pub fn validate(&self) -> Result<(), ErrorKind> {
        if self.config_folder == self.job_folder {
            return Err(ErrorKind::Invalid(
                "config_folder and job_folder must differ".to_string(),
            ));
        }
        if self.poll_interval_secs < MIN_POLL_INTERVAL_SECS {
            return Err(ErrorKind::Invalid(format!(
                "poll_interval must be >= {MIN_POLL_INTERVAL_SECS}s"
            )));
        }
        if self.name.trim().is_empty() {
            return Err(ErrorKind::Invalid("project name cannot be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Config,
    Job,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Config => "config",
            FileType::Job => "job",
        }
    }
}

/// An immutable snapshot of one path from the source at a known commit.
///
/// Unique by `(project_id, path)`; the id is preserved across content
/// changes so overrides stay linked. Nothing is ever physically removed
/// (archive semantics); two independent flags mark the two ways a file
/// leaves service:
/// - `stale`: the poller no longer sees the path in the source. Cleared
///   again the moment the path is re-observed.
/// - `deleted_at_ms`: an explicit user delete. Sticky; re-observation by
///   the poller never clears it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub file_id: String,
    pub project_id: String,
    pub path: String,
    /// Basename of `path`.
    pub name: String,
    pub content: String,
    pub file_type: FileType,
    /// Derived from the parent folder of the path, e.g. "mmlu" for
    /// `jobs/mmlu/eval-job.yaml`.
    pub benchmark_type: String,
    pub source_commit: String,
    pub last_observed_at_ms: u64,
    #[serde(default)]
    pub stale: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at_ms: Option<u64>,
}

impl SourceFile {
    /// Benchmark type and basename, derived from a source path.
    pub fn split_path(path: &str) -> (String, String) {
        let mut parts = path.rsplit('/');
        let name = parts.next().unwrap_or(path).to_string();
        let benchmark_type = parts.next().unwrap_or("").to_string();
        (benchmark_type, name)
    }
}

/// A user-authored override of one [`SourceFile`].
///
/// Unique by `(original_file_id, modified_name)`. Survives deletion of the
/// original (flagged `orphaned`), never dangles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifiedFile {
    pub modified_file_id: String,
    pub original_file_id: String,
    pub project_id: String,
    pub modified_name: String,
    pub content: String,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    #[serde(default)]
    pub orphaned: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_project() -> Project {
        Project {
            project_id: "p1".to_string(),
            name: "llm-benchmarks".to_string(),
            owner: "acme".to_string(),
            repo: "benchmarks".to_string(),
            git_ref: "main".to_string(),
            config_folder: "configs".to_string(),
            job_folder: "jobs".to_string(),
            poll_interval_secs: 60,
            credentials_ref: None,
            created_at_ms: 0,
            updated_at_ms: 0,
            last_sync_ms: None,
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(make_project().validate().is_ok());
    }

    #[test]
    fn test_validate_same_folders() {
        let mut p = make_project();
        p.job_folder = p.config_folder.clone();
        assert!(matches!(p.validate(), Err(ErrorKind::Invalid(_))));
    }

    #[test]
    fn test_validate_interval_floor() {
        let mut p = make_project();
        p.poll_interval_secs = 5;
        assert!(matches!(p.validate(), Err(ErrorKind::Invalid(_))));
        p.poll_interval_secs = 10;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_split_path() {
        let (bench, name) = SourceFile::split_path("jobs/mmlu/eval-job.yaml");
        assert_eq!(bench, "mmlu");
        assert_eq!(name, "eval-job.yaml");

        let (bench, name) = SourceFile::split_path("top-level.yaml");
        assert_eq!(bench, "");
        assert_eq!(name, "top-level.yaml");
    }
}
