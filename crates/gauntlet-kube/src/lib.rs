//! Typed operations against the cluster API.
//!
//! The sole component that talks to Kubernetes: multi-document apply and
//! delete with server-side semantics, normalized status reads, log streams
//! and exec channels. The gateway never persists state.

pub mod gateway;
pub mod manifest;

pub use gateway::{ClusterGateway, DeploymentStatusSnapshot, JobStatusSnapshot, PodRef};
pub use manifest::{doc_meta, parse_documents, primary_resource, DocMeta};

// The exec channel types callers hold when bridging terminals.
pub use kube::api::{AttachedProcess, TerminalSize};
