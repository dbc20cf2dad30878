use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Job,
    Deployment,
    Service,
    Configmap,
    Secret,
    Statefulset,
    Unknown,
}

impl ResourceKind {
    pub fn from_kind(kind: &str) -> Self {
        match kind.to_ascii_lowercase().as_str() {
            "job" => ResourceKind::Job,
            "deployment" => ResourceKind::Deployment,
            "service" => ResourceKind::Service,
            "configmap" => ResourceKind::Configmap,
            "secret" => ResourceKind::Secret,
            "statefulset" => ResourceKind::Statefulset,
            _ => ResourceKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Job => "job",
            ResourceKind::Deployment => "deployment",
            ResourceKind::Service => "service",
            ResourceKind::Configmap => "configmap",
            ResourceKind::Secret => "secret",
            ResourceKind::Statefulset => "statefulset",
            ResourceKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Deleted,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Completed | DeploymentStatus::Failed | DeploymentStatus::Deleted
        )
    }

    /// The status lattice: `pending → running → completed`,
    /// `pending|running → failed`, any → `deleted`. Terminal states are
    /// absorbing apart from the transition to `deleted`.
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        if *self == next {
            return false;
        }
        match (*self, next) {
            (_, Deleted) => *self != Deleted,
            (Pending, Running) | (Pending, Completed) | (Running, Completed) => true,
            (Pending, Failed) | (Running, Failed) => true,
            _ => false,
        }
    }
}

/// One resource observed in apply order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppliedResource {
    pub kind: ResourceKind,
    pub api_version: String,
    pub name: String,
    pub namespace: String,
}

/// A tracked bundle of cluster resources created from one apply request.
///
/// Never physically removed; transitions to `deleted` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// ULID, sortable by creation time.
    pub deployment_id: String,
    /// Exact bytes submitted; deletion replays these, never a re-derivation.
    pub yaml_content: String,
    pub namespace: String,
    pub primary_resource_type: ResourceKind,
    pub primary_resource_name: String,
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

    #[test]
    fn test_lattice_forward_only() {
        use DeploymentStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Running.can_transition_to(Failed));

        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_lattice_deleted_absorbing() {
        use DeploymentStatus::*;
        for s in [Pending, Running, Completed, Failed] {
            assert!(s.can_transition_to(Deleted));
        }
        for s in [Pending, Running, Completed, Failed, Deleted] {
            assert!(!Deleted.can_transition_to(s));
        }
    }

    #[test]
    fn test_resource_kind_from_kind() {
        assert_eq!(ResourceKind::from_kind("Job"), ResourceKind::Job);
        assert_eq!(ResourceKind::from_kind("StatefulSet"), ResourceKind::Statefulset);
        assert_eq!(ResourceKind::from_kind("CronJob"), ResourceKind::Unknown);
    }
}
