use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use gauntlet_common::ErrorKind;

use crate::scheduler::EvaluateRequest;
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

/// Non-blocking: creates the task and returns immediately.
pub async fn evaluate(State(st): State<AppState>, Json(body): Json<EvaluateRequest>) -> Response {
    match st.scheduler.schedule(body).await {
        Ok(task) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "task_id": task.task_id,
                "state": task.state,
                "scheduled_at_ms": task.scheduled_at_ms,
                "message": format!(
                    "evaluation scheduled to fire in {} minutes",
                    st.scheduler.delay.as_secs() / 60
                ),
            })),
        )
            .into_response(),
        Err(kind) => error_response(&kind),
    }
}

/// Synchronous variant: compose and submit right now, no task record.
pub async fn run(State(st): State<AppState>, Json(body): Json<EvaluateRequest>) -> Response {
    match st.scheduler.run_now(body).await {
        Ok((deployment_id, composition)) => (
            StatusCode::CREATED,
            Json(json!({
                "deployment_id": deployment_id,
                "job_name": composition.job_name,
            })),
        )
            .into_response(),
        Err(kind) => error_response(&kind),
    }
}

pub async fn list_tasks(State(st): State<AppState>) -> Response {
    match st.store.list_tasks().await {
        Ok(tasks) => Json(json!({ "tasks": tasks })).into_response(),
        Err(e) => internal(e),
    }
}

pub async fn get_task(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    match st.store.get_task(&id).await {
        Ok(Some(t)) => Json(t).into_response(),
        Ok(None) => error_response(&ErrorKind::NotFound(format!("task {id}"))),
        Err(e) => internal(e),
    }
}

pub async fn cancel_task(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    match st.scheduler.cancel(&id).await {
        Ok(task) => Json(task).into_response(),
        Err(kind) => error_response(&kind),
    }
}

pub async fn health(State(st): State<AppState>) -> Response {
    match st.store.ping().await {
        Ok(()) => Json(json!({"status": "ok", "service": "gauntlet-eval"})).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            error_response(&ErrorKind::Upstream("database unreachable".to_string()))
        }
    }
}
