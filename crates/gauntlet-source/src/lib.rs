//! Client for the external versioned source (GitHub REST contents API).
//!
//! The only component that talks to the source. Shared by the manager's
//! poller (read), the eval composition path (read) and the mlflow bridge
//! (read + write). Requests are rate limited per client/token.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use gauntlet_common::ErrorKind;

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "gauntlet-source";

/// Minimum gap between requests: 10 rps per token.
const REQUEST_GAP: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unauthorized against source api")]
    Unauthorized,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited by source api")]
    RateLimited,
    #[error("source api returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("bad payload: {0}")]
    Decode(String),
}

impl SourceError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            SourceError::Unauthorized => ErrorKind::Unauthorized("source token rejected".into()),
            SourceError::NotFound(p) => ErrorKind::NotFound(p.clone()),
            SourceError::RateLimited => ErrorKind::Transient("source rate limit".into()),
            SourceError::Status { status, body } => {
                ErrorKind::Upstream(format!("source api {status}: {body}"))
            }
            SourceError::Network(e) => ErrorKind::Transient(e.to_string()),
            SourceError::Decode(m) => ErrorKind::Upstream(m.clone()),
        }
    }
}

/// One entry from a folder listing.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteEntry {
    pub path: String,
    pub name: String,
    pub sha: String,
    #[serde(rename = "type")]
    pub entry_type: String,
}

impl RemoteEntry {
    pub fn is_file(&self) -> bool {
        self.entry_type == "file"
    }
    pub fn is_dir(&self) -> bool {
        self.entry_type == "dir"
    }
}

/// A fetched file: decoded content plus the blob sha it was read at.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub path: String,
    pub content: String,
    pub sha: String,
}

#[derive(Debug, Deserialize)]
struct ContentPayload {
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

/// Decode a contents-API payload. GitHub wraps base64 at 60 columns, so
/// whitespace is stripped before decoding.
fn decode_content(path: &str, payload: &ContentPayload) -> Result<String, SourceError> {
    let raw = payload
        .content
        .as_deref()
        .ok_or_else(|| SourceError::Decode(format!("no content for {path}")))?;
    if payload.encoding.as_deref() != Some("base64") {
        return Err(SourceError::Decode(format!(
            "unexpected encoding {:?} for {path}",
            payload.encoding
        )));
    }
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| SourceError::Decode(format!("base64 for {path}: {e}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Clone)]
pub struct SourceClient {
    http: reqwest::Client,
    token: Option<String>,
    base: String,
    next_allowed: Arc<Mutex<Instant>>,
}

impl SourceClient {
    pub fn new(token: Option<String>) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            token,
            base: API_BASE.to_string(),
            next_allowed: Arc::new(Mutex::new(Instant::now())),
        })
    }

    /// Override the API base URL (self-hosted instances, tests).
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    async fn throttle(&self) {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep_until(*next).await;
        }
        *next = Instant::now() + REQUEST_GAP;
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req.header("Accept", "application/vnd.github.v3+json");
        match &self.token {
            Some(t) if !t.is_empty() => req.header("Authorization", format!("token {t}")),
            _ => req,
        }
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, SourceError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        match status.as_u16() {
            401 => Err(SourceError::Unauthorized),
            403 | 429 => Err(SourceError::RateLimited),
            404 => Err(SourceError::NotFound(what.to_string())),
            s => {
                let body = resp.text().await.unwrap_or_default();
                Err(SourceError::Status { status: s, body })
            }
        }
    }

    /// List all files under `folder` at `git_ref`, walking subfolders.
    /// Benchmark repos keep one subfolder per benchmark type, so a shallow
    /// recursion (capped) covers them.
    pub async fn list_files(
        &self,
        owner: &str,
        repo: &str,
        folder: &str,
        git_ref: &str,
    ) -> Result<Vec<RemoteEntry>, SourceError> {
        let mut out = Vec::new();
        let mut pending = vec![(folder.to_string(), 0u8)];
        while let Some((path, depth)) = pending.pop() {
            let entries = self.list_folder(owner, repo, &path, git_ref).await?;
            for entry in entries {
                if entry.is_file() {
                    out.push(entry);
                } else if entry.is_dir() && depth < 4 {
                    pending.push((entry.path.clone(), depth + 1));
                }
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn list_folder(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Vec<RemoteEntry>, SourceError> {
        self.throttle().await;
        let url = format!("{}/repos/{owner}/{repo}/contents/{path}", self.base);
        debug!(url, git_ref, "listing source folder");
        let resp = self
            .auth(self.http.get(&url).query(&[("ref", git_ref)]))
            .send()
            .await?;
        let resp = Self::check(resp, path).await?;
        Ok(resp.json().await?)
    }

    /// Fetch one file's decoded content and blob sha.
    pub async fn fetch_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<RemoteFile, SourceError> {
        self.throttle().await;
        let url = format!("{}/repos/{owner}/{repo}/contents/{path}", self.base);
        let resp = self
            .auth(self.http.get(&url).query(&[("ref", git_ref)]))
            .send()
            .await?;
        let resp = Self::check(resp, path).await?;
        let payload: ContentPayload = resp.json().await?;
        Ok(RemoteFile {
            path: path.to_string(),
            content: decode_content(path, &payload)?,
            sha: payload.sha,
        })
    }

    /// Like `fetch_file` but maps 404 to `None`, for mirror-state probes.
    pub async fn fetch_file_optional(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<RemoteFile>, SourceError> {
        match self.fetch_file(owner, repo, path, git_ref).await {
            Ok(f) => Ok(Some(f)),
            Err(SourceError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create or update a file. Pass the current blob sha when updating;
    /// GitHub rejects an update without it.
    pub async fn put_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        branch: &str,
        message: &str,
        content: &str,
        existing_sha: Option<&str>,
    ) -> Result<(), SourceError> {
        self.throttle().await;
        let url = format!("{}/repos/{owner}/{repo}/contents/{path}", self.base);
        let encoded = base64::engine::general_purpose::STANDARD.encode(content.as_bytes());
        let mut body = serde_json::json!({
            "message": message,
            "content": encoded,
            "branch": branch,
        });
        if let Some(sha) = existing_sha {
            body["sha"] = serde_json::Value::String(sha.to_string());
        }
        let resp = self.auth(self.http.put(&url).json(&body)).send().await?;
        Self::check(resp, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_content_strips_wrapping() {
        // "kind: Job\n" base64-wrapped the way the contents API returns it.
        let payload = ContentPayload {
            sha: "abc".to_string(),
            content: Some("a2luZDog\nSm9iCg==\n".to_string()),
            encoding: Some("base64".to_string()),
        };
        assert_eq!(decode_content("x.yaml", &payload).unwrap(), "kind: Job\n");
    }

    #[test]
    fn test_decode_content_rejects_other_encodings() {
        let payload = ContentPayload {
            sha: "abc".to_string(),
            content: Some("plain".to_string()),
            encoding: Some("utf-8".to_string()),
        };
        assert!(decode_content("x.yaml", &payload).is_err());
    }

    #[test]
    fn test_entry_listing_parse() {
        let raw = r#"[
            {"path": "jobs/mmlu/job.yaml", "name": "job.yaml", "sha": "a1", "type": "file"},
            {"path": "jobs/gsm8k", "name": "gsm8k", "sha": "d1", "type": "dir"}
        ]"#;
        let entries: Vec<RemoteEntry> = serde_json::from_str(raw).unwrap();
        assert!(entries[0].is_file());
        assert!(entries[1].is_dir());
        assert_eq!(entries[0].path, "jobs/mmlu/job.yaml");
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            SourceError::Unauthorized.error_kind().http_status(),
            401
        );
        assert_eq!(
            SourceError::NotFound("p".into()).error_kind().http_status(),
            404
        );
        assert_eq!(SourceError::RateLimited.error_kind().http_status(), 503);
    }
}
