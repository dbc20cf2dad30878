use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use gauntlet_common::{now_ms, ErrorKind, VllmConfig};

use crate::placement::DeployOutcome;
use crate::state::AppState;

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

#[derive(Debug, Deserialize)]
pub struct VllmDeployRequest {
    pub config: VllmConfig,
}

pub async fn deploy(State(st): State<AppState>, Json(body): Json<VllmDeployRequest>) -> Response {
    if body.config.model_name.trim().is_empty() {
        return error_response(&ErrorKind::Invalid("model_name cannot be empty".to_string()));
    }

    match st.placement.deploy(body.config).await {
        Ok(DeployOutcome::Reused(existing)) => Json(json!({
            "deployment_id": existing.deployment_id,
            "deployment_name": existing.statefulset_name,
            "status": existing.status,
            "config": existing.config,
            "reused": true,
            "message": "reusing existing deployment with matching configuration",
        }))
        .into_response(),
        Ok(DeployOutcome::Created {
            deployment,
            evicted,
        }) => (
            StatusCode::CREATED,
            Json(json!({
                "deployment_id": deployment.deployment_id,
                "deployment_name": deployment.statefulset_name,
                "status": deployment.status,
                "config": deployment.config,
                "reused": false,
                "evicted": evicted,
                "message": "vllm deployment submitted",
            })),
        )
            .into_response(),
        Err(kind) => error_response(&kind),
    }
}

pub async fn list_deployments(State(st): State<AppState>) -> Response {
    match st.store.list_vllm_deployments().await {
        Ok(list) => Json(json!({ "deployments": list })).into_response(),
        Err(e) => internal(e),
    }
}

pub async fn get_deployment(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    match st.store.get_vllm_deployment(&id).await {
        Ok(Some(d)) => Json(d).into_response(),
        Ok(None) => error_response(&ErrorKind::NotFound(format!("vllm deployment {id}"))),
        Err(e) => internal(e),
    }
}

pub async fn delete_deployment(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    match st.placement.delete(&id).await {
        Ok(record) => Json(record).into_response(),
        Err(kind) => error_response(&kind),
    }
}

pub async fn health(State(st): State<AppState>) -> Response {
    match st.store.ping().await {
        Ok(()) => Json(json!({"status": "ok", "service": "gauntlet-vllm"})).into_response(),
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
        .list_active_vllm_deployments()
        .await
        .map(|d| d.len())
        .unwrap_or(0);
    Json(json!({
        "service": "gauntlet-vllm",
        "status": if kubernetes_version.is_some() { "healthy" } else { "degraded" },
        "kubernetes_version": kubernetes_version,
        "active_deployments": active,
        "uptime_secs": now_ms().saturating_sub(st.started_at_ms) / 1000,
    }))
    .into_response()
}
