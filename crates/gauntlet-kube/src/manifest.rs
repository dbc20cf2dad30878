use gauntlet_common::{AppliedResource, ErrorKind, ResourceKind};
use serde::Deserialize;

/// Identity fields of one manifest document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocMeta {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl DocMeta {
    pub fn resource_kind(&self) -> ResourceKind {
        ResourceKind::from_kind(&self.kind)
    }

    /// Group and version halves of `apiVersion` ("batch/v1" → ("batch", "v1"),
    /// core "v1" → ("", "v1")).
    pub fn group_version(&self) -> (String, String) {
        match self.api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), self.api_version.clone()),
        }
    }

    /// Lowercased plural used for the dynamic API path.
    pub fn plural(&self) -> String {
        format!("{}s", self.kind.to_lowercase())
    }

    pub fn applied(&self, fallback_namespace: &str) -> AppliedResource {
        AppliedResource {
            kind: self.resource_kind(),
            api_version: self.api_version.clone(),
            name: self.name.clone(),
            namespace: self
                .namespace
                .clone()
                .unwrap_or_else(|| fallback_namespace.to_string()),
        }
    }
}

/// Parse multi-document YAML, skipping empty documents. Every document
/// must carry apiVersion, kind and metadata.name.
pub fn parse_documents(yaml: &str) -> Result<Vec<serde_yaml::Value>, ErrorKind> {
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(yaml) {
        let value = serde_yaml::Value::deserialize(doc)
            .map_err(|e| ErrorKind::Invalid(format!("invalid yaml: {e}")))?;
        if value.is_null() {
            continue;
        }
        if !value.is_mapping() {
            return Err(ErrorKind::Invalid(
                "manifest document must be a mapping".to_string(),
            ));
        }
        // Fail fast on structurally unusable documents.
        doc_meta(&value)?;
        docs.push(value);
    }
    if docs.is_empty() {
        return Err(ErrorKind::Invalid("no manifest documents found".to_string()));
    }
    Ok(docs)
}

pub fn doc_meta(doc: &serde_yaml::Value) -> Result<DocMeta, ErrorKind> {
    let api_version = doc
        .get("apiVersion")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ErrorKind::Invalid("manifest missing apiVersion".to_string()))?;
    let kind = doc
        .get("kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ErrorKind::Invalid("manifest missing kind".to_string()))?;
    let metadata = doc
        .get("metadata")
        .ok_or_else(|| ErrorKind::Invalid("manifest missing metadata".to_string()))?;
    let name = metadata
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ErrorKind::Invalid("manifest missing metadata.name".to_string()))?;
    let namespace = metadata
        .get("namespace")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    Ok(DocMeta {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        namespace,
    })
}

/// Inject `metadata.namespace` when the document does not set one.
pub fn default_namespace(doc: &mut serde_yaml::Value, namespace: &str) {
    if let Some(metadata) = doc.get_mut("metadata").and_then(|m| m.as_mapping_mut()) {
        let key = serde_yaml::Value::String("namespace".to_string());
        if !metadata.contains_key(&key) {
            metadata.insert(key, serde_yaml::Value::String(namespace.to_string()));
        }
    }
}

/// The first document in apply order drives the tracked deployment.
pub fn primary_resource(docs: &[serde_yaml::Value]) -> Result<DocMeta, ErrorKind> {
    doc_meta(
        docs.first()
            .ok_or_else(|| ErrorKind::Invalid("no manifest documents found".to_string()))?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTI: &str = r#"
apiVersion: batch/v1
kind: Job
metadata:
  name: bench-job
spec:
  template:
    spec:
      containers:
        - name: bench
          image: busybox
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: bench-config
  namespace: evals
data:
  config.json: "{}"
"#;

    #[test]
    fn test_parse_multi_document() {
        let docs = parse_documents(MULTI).unwrap();
        assert_eq!(docs.len(), 2);

        let primary = primary_resource(&docs).unwrap();
        assert_eq!(primary.kind, "Job");
        assert_eq!(primary.name, "bench-job");
        assert_eq!(primary.resource_kind(), gauntlet_common::ResourceKind::Job);
        assert_eq!(primary.namespace, None);

        let second = doc_meta(&docs[1]).unwrap();
        assert_eq!(second.namespace.as_deref(), Some("evals"));
    }

    #[test]
    fn test_group_version_and_plural() {
        let docs = parse_documents(MULTI).unwrap();
        let job = doc_meta(&docs[0]).unwrap();
        assert_eq!(job.group_version(), ("batch".to_string(), "v1".to_string()));
        assert_eq!(job.plural(), "jobs");

        let cm = doc_meta(&docs[1]).unwrap();
        assert_eq!(cm.group_version(), (String::new(), "v1".to_string()));
        assert_eq!(cm.plural(), "configmaps");
    }

    #[test]
    fn test_default_namespace_only_when_absent() {
        let mut docs = parse_documents(MULTI).unwrap();
        default_namespace(&mut docs[0], "default");
        default_namespace(&mut docs[1], "default");
        assert_eq!(
            doc_meta(&docs[0]).unwrap().namespace.as_deref(),
            Some("default")
        );
        // Explicit namespace wins.
        assert_eq!(
            doc_meta(&docs[1]).unwrap().namespace.as_deref(),
            Some("evals")
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_documents(": not yaml [").is_err());
        assert!(parse_documents("").is_err());
        assert!(parse_documents("apiVersion: v1\nkind: Pod\n").is_err()); // no name
    }

    #[test]
    fn test_skips_empty_documents() {
        let yaml = "---\n---\napiVersion: v1\nkind: Service\nmetadata:\n  name: s\n";
        let docs = parse_documents(yaml).unwrap();
        assert_eq!(docs.len(), 1);
    }
}
