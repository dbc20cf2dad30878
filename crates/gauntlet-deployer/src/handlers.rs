use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use gauntlet_common::{now_ms, ErrorKind};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    request_id: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

pub fn error_response(kind: &ErrorKind) -> Response {
    let status =
        StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorResponse {
        error: ErrorDetail {
            code: kind.code().to_string(),
            message: kind.to_string(),
            request_id: format!("req_{}", Uuid::new_v4()),
        },
    };
    (status, Json(body)).into_response()
}

fn internal(err: anyhow::Error) -> Response {
    tracing::error!(error = %err, "handler failed");
    error_response(&ErrorKind::Fatal(err.to_string()))
}

// ---------------------------------------------------------------------------
// Deploy / delete
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    pub yaml_content: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

pub async fn deploy(State(st): State<AppState>, Json(body): Json<DeployRequest>) -> Response {
    let namespace = body
        .namespace
        .unwrap_or_else(|| st.default_namespace.clone());
    match st.tracker.submit(&body.yaml_content, &namespace).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(kind) => error_response(&kind),
    }
}

pub async fn delete(State(st): State<AppState>, Json(body): Json<DeployRequest>) -> Response {
    let namespace = body
        .namespace
        .unwrap_or_else(|| st.default_namespace.clone());
    match st
        .tracker
        .delete_by_yaml(&body.yaml_content, &namespace)
        .await
    {
        Ok(deleted) => Json(json!({
            "status": "success",
            "deleted_resources": deleted,
            "namespace": namespace,
        }))
        .into_response(),
        Err(kind) => error_response(&kind),
    }
}

pub async fn list_deployments(State(st): State<AppState>) -> Response {
    match st.store.list_deployments(None).await {
        Ok(list) => Json(json!({ "deployments": list })).into_response(),
        Err(e) => internal(e),
    }
}

pub async fn get_deployment(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    match st.store.get_deployment(&id).await {
        Ok(Some(d)) => Json(d).into_response(),
        Ok(None) => error_response(&ErrorKind::NotFound(format!("deployment {id}"))),
        Err(e) => internal(e),
    }
}

pub async fn delete_deployment(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    match st.tracker.delete_by_id(&id).await {
        Ok(record) => Json(record).into_response(),
        Err(kind) => error_response(&kind),
    }
}

// ---------------------------------------------------------------------------
// Job observability
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
pub struct NamespaceQuery {
    pub namespace: Option<String>,
}

pub async fn job_status(
    State(st): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<NamespaceQuery>,
) -> Response {
    let namespace = q.namespace.unwrap_or_else(|| st.default_namespace.clone());
    match st.gateway.job_status(&namespace, &name).await {
        Ok(snap) => Json(json!({
            "job_name": name,
            "namespace": namespace,
            "status": snap.phase(),
            "active_pods": snap.active,
            "succeeded_pods": snap.succeeded,
            "failed_pods": snap.failed,
            "start_time": snap.start_time,
            "completion_time": snap.completion_time,
        }))
        .into_response(),
        Err(kind) => error_response(&kind),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct LogsQuery {
    pub namespace: Option<String>,
    pub tail: Option<i64>,
    #[serde(default)]
    pub follow: bool,
    /// Seconds of history to include.
    pub since: Option<i64>,
    pub container: Option<String>,
}

pub async fn job_logs(
    State(st): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<LogsQuery>,
) -> Response {
    let namespace = q.namespace.unwrap_or_else(|| st.default_namespace.clone());
    let tail = q.tail.unwrap_or(st.log_tail_lines);

    let pods = match st.gateway.job_pods(&namespace, &name).await {
        Ok(pods) => pods,
        Err(kind) => return error_response(&kind),
    };
    let Some(pod) = pods.first() else {
        return error_response(&ErrorKind::NotFound(format!("no pods for job {name}")));
    };

    if q.follow {
        let stream = match st
            .gateway
            .pod_log_stream(&namespace, &pod.name, q.container.as_deref(), tail, q.since)
            .await
        {
            Ok(s) => s,
            Err(kind) => return error_response(&kind),
        };
        let body = Body::from_stream(
            stream.map(|line| line.map(|l| Bytes::from(format!("{l}\n")))),
        );
        return Response::builder()
            .header("content-type", "text/plain; charset=utf-8")
            .body(body)
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    match st
        .gateway
        .pod_logs(&namespace, &pod.name, q.container.as_deref(), tail, q.since)
        .await
    {
        Ok(lines) => Json(json!({
            "job_name": name,
            "namespace": namespace,
            "pod_name": pod.name,
            "logs": lines,
        }))
        .into_response(),
        Err(kind) => error_response(&kind),
    }
}

/// Deployment-scoped logs: resolve the record, then proxy as above.
pub async fn deployment_logs(
    State(st): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<LogsQuery>,
) -> Response {
    let record = match st.store.get_deployment(&id).await {
        Ok(Some(d)) => d,
        Ok(None) => return error_response(&ErrorKind::NotFound(format!("deployment {id}"))),
        Err(e) => return internal(e),
    };
    let q = LogsQuery {
        namespace: Some(record.namespace.clone()),
        ..q
    };
    job_logs(
        State(st),
        Path(record.primary_resource_name.clone()),
        Query(q),
    )
    .await
}

// ---------------------------------------------------------------------------
// Terminal sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TerminalCreateRequest {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub pod_name: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
}

pub async fn create_terminal(
    State(st): State<AppState>,
    Path(job_name): Path<String>,
    Json(body): Json<TerminalCreateRequest>,
) -> Response {
    let namespace = body
        .namespace
        .unwrap_or_else(|| st.default_namespace.clone());
    match st
        .broker
        .create_session(
            &job_name,
            &namespace,
            body.pod_name.as_deref(),
            body.container_name.as_deref(),
            body.shell.as_deref(),
        )
        .await
    {
        Ok(info) => {
            let websocket_url = format!("/terminal/{}", info.session_id);
            let mut payload = serde_json::to_value(&info).unwrap_or_default();
            payload["websocket_url"] = json!(websocket_url);
            (StatusCode::CREATED, Json(payload)).into_response()
        }
        Err(kind) => error_response(&kind),
    }
}

pub async fn terminal_ws(
    State(st): State<AppState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    if st.broker.get_session(&session_id).is_none() {
        return error_response(&ErrorKind::NotFound(format!("session {session_id}")));
    }
    ws.on_upgrade(move |socket| async move {
        st.broker.attach(&session_id, socket).await;
    })
}

#[derive(Debug, Deserialize, Default)]
pub struct SessionFilter {
    pub job: Option<String>,
}

pub async fn list_terminal_sessions(
    State(st): State<AppState>,
    Query(filter): Query<SessionFilter>,
) -> Response {
    let sessions = st.broker.list_sessions(filter.job.as_deref());
    let active = sessions.iter().filter(|s| s.is_active).count();
    Json(json!({
        "sessions": sessions,
        "total_sessions": sessions.len(),
        "active_sessions": active,
    }))
    .into_response()
}

pub async fn close_terminal_session(
    State(st): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if st.broker.close_session(&session_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(&ErrorKind::NotFound(format!("session {session_id}")))
    }
}

// ---------------------------------------------------------------------------
// Health / status
// ---------------------------------------------------------------------------

pub async fn health(State(st): State<AppState>) -> Response {
    match st.store.ping().await {
        Ok(()) => Json(json!({"status": "ok", "service": "gauntlet-deployer"})).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            error_response(&ErrorKind::Upstream("database unreachable".to_string()))
        }
    }
}

pub async fn status(State(st): State<AppState>) -> Response {
    let kubernetes_version = st.gateway.version().await.ok();
    let active = st
        .store
        .list_open_deployments()
        .await
        .map(|d| d.len())
        .unwrap_or(0);
    let uptime_secs = now_ms().saturating_sub(st.started_at_ms) / 1000;
    Json(json!({
        "service": "gauntlet-deployer",
        "status": if kubernetes_version.is_some() { "healthy" } else { "degraded" },
        "kubernetes_version": kubernetes_version,
        "active_deployments": active,
        "uptime_secs": uptime_secs,
    }))
    .into_response()
}
