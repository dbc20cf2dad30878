use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use gauntlet_common::{now_ms, ErrorKind, FileType, ModifiedFile, Project};

use crate::lint::parse_file;
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
// Projects
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ProjectCreate {
    pub name: String,
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub git_ref: Option<String>,
    pub config_folder: String,
    pub job_folder: String,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub credentials_ref: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub git_ref: Option<String>,
    pub config_folder: Option<String>,
    pub job_folder: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub credentials_ref: Option<String>,
}

pub async fn create_project(
    State(st): State<AppState>,
    Json(body): Json<ProjectCreate>,
) -> Response {
    let now = now_ms();
    let project = Project {
        project_id: Uuid::new_v4().to_string(),
        name: body.name,
        owner: body.owner,
        repo: body.repo,
        git_ref: body.git_ref.unwrap_or_else(|| "main".to_string()),
        config_folder: body.config_folder,
        job_folder: body.job_folder,
        poll_interval_secs: body.poll_interval_secs.unwrap_or(60),
        credentials_ref: body.credentials_ref,
        created_at_ms: now,
        updated_at_ms: now,
        last_sync_ms: None,
    };
    if let Err(kind) = project.validate() {
        return error_response(&kind);
    }
    if let Err(e) = st.store.insert_project(&project).await {
        return internal(e);
    }
    st.poller.start_project(&project.project_id);
    (StatusCode::CREATED, Json(project)).into_response()
}

pub async fn list_projects(State(st): State<AppState>) -> Response {
    match st.store.list_projects().await {
        Ok(projects) => Json(json!({ "projects": projects })).into_response(),
        Err(e) => internal(e),
    }
}

pub async fn get_project(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    match st.store.get_project(&id).await {
        Ok(Some(p)) => Json(p).into_response(),
        Ok(None) => error_response(&ErrorKind::NotFound(format!("project {id}"))),
        Err(e) => internal(e),
    }
}

pub async fn update_project(
    State(st): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ProjectUpdate>,
) -> Response {
    let mut project = match st.store.get_project(&id).await {
        Ok(Some(p)) => p,
        Ok(None) => return error_response(&ErrorKind::NotFound(format!("project {id}"))),
        Err(e) => return internal(e),
    };

    if let Some(name) = body.name {
        project.name = name;
    }
    if let Some(git_ref) = body.git_ref {
        project.git_ref = git_ref;
    }
    if let Some(config_folder) = body.config_folder {
        project.config_folder = config_folder;
    }
    if let Some(job_folder) = body.job_folder {
        project.job_folder = job_folder;
    }
    if let Some(interval) = body.poll_interval_secs {
        project.poll_interval_secs = interval;
    }
    if let Some(credentials_ref) = body.credentials_ref {
        project.credentials_ref = Some(credentials_ref);
    }
    project.updated_at_ms = now_ms();

    if let Err(kind) = project.validate() {
        return error_response(&kind);
    }
    match st.store.update_project(&project).await {
        Ok(true) => Json(project).into_response(),
        Ok(false) => error_response(&ErrorKind::NotFound(format!("project {id}"))),
        Err(e) => internal(e),
    }
}

pub async fn delete_project(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    st.poller.stop_project(&id);
    match st.store.delete_project(&id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(&ErrorKind::NotFound(format!("project {id}"))),
        Err(e) => internal(e),
    }
}

pub async fn project_stats(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    let project = match st.store.get_project(&id).await {
        Ok(Some(p)) => p,
        Ok(None) => return error_response(&ErrorKind::NotFound(format!("project {id}"))),
        Err(e) => return internal(e),
    };
    let files = match st.store.list_files(&id, None, None).await {
        Ok(f) => f,
        Err(e) => return internal(e),
    };
    let modified = match st.store.list_modified_files(&id, None).await {
        Ok(m) => m,
        Err(e) => return internal(e),
    };

    let config_files = files.iter().filter(|f| f.file_type == FileType::Config).count();
    let job_files = files.iter().filter(|f| f.file_type == FileType::Job).count();

    Json(json!({
        "project_id": id,
        "total_original_files": files.len(),
        "config_files": config_files,
        "job_files": job_files,
        "total_modified_files": modified.len(),
        "last_sync_ms": project.last_sync_ms,
    }))
    .into_response()
}

pub async fn sync_project(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    match st.store.get_project(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(&ErrorKind::NotFound(format!("project {id}"))),
        Err(e) => return internal(e),
    }
    if !st.poller.force_sync(&id) {
        st.poller.start_project(&id);
        st.poller.force_sync(&id);
    }
    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "accepted", "project_id": id})),
    )
        .into_response()
}

pub async fn reset_project(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    match st.store.reset_project_overrides(&id).await {
        Ok(removed) => Json(json!({"project_id": id, "removed_overrides": removed})).into_response(),
        Err(e) => internal(e),
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
pub struct FileFilter {
    pub file_type: Option<FileType>,
    pub benchmark_type: Option<String>,
}

pub async fn list_project_files(
    State(st): State<AppState>,
    Path(id): Path<String>,
    Query(filter): Query<FileFilter>,
) -> Response {
    let files = match st
        .store
        .list_files(&id, filter.file_type, filter.benchmark_type.as_deref())
        .await
    {
        Ok(f) => f,
        Err(e) => return internal(e),
    };
    let modified = match st.store.list_modified_files(&id, None).await {
        Ok(m) => m,
        Err(e) => return internal(e),
    };

    let mut rows: Vec<serde_json::Value> = files
        .into_iter()
        .map(|f| {
            let mut v = serde_json::to_value(&f).unwrap_or_default();
            v["source"] = json!("original");
            v
        })
        .collect();
    for m in modified {
        let mut v = serde_json::to_value(&m).unwrap_or_default();
        v["source"] = json!("modified");
        rows.push(v);
    }

    Json(json!({ "files": rows })).into_response()
}

pub async fn get_file(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    match st.store.get_file(&id).await {
        Ok(Some(f)) => Json(f).into_response(),
        Ok(None) => error_response(&ErrorKind::NotFound(format!("file {id}"))),
        Err(e) => internal(e),
    }
}

/// Soft delete: the snapshot is kept for reproducibility, stamped with a
/// delete time; its overrides are flagged orphaned. The stamp is sticky,
/// so the poller seeing the path again does not revive the file.
pub async fn delete_file(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    let at_ms = now_ms();
    match st.store.delete_file(&id, at_ms).await {
        Ok(true) => Json(json!({"file_id": id, "deleted_at_ms": at_ms})).into_response(),
        Ok(false) => error_response(&ErrorKind::NotFound(format!("file {id}"))),
        Err(e) => internal(e),
    }
}

pub async fn lint_file(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    let file = match st.store.get_file(&id).await {
        Ok(Some(f)) => f,
        Ok(None) => return error_response(&ErrorKind::NotFound(format!("file {id}"))),
        Err(e) => return internal(e),
    };
    match parse_file(file.file_type, &file.content) {
        Ok(parsed) => Json(json!({"valid": true, "parsed": parsed})).into_response(),
        Err(kind) => Json(json!({"valid": false, "detail": kind.to_string()})).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Modified files
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ModifiedFileCreate {
    pub original_file_id: String,
    pub modified_name: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ModifiedFileUpdate {
    pub content: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ModifiedFileFilter {
    pub original_file_id: Option<String>,
}

pub async fn create_modified_file(
    State(st): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<ModifiedFileCreate>,
) -> Response {
    let original = match st.store.get_file(&body.original_file_id).await {
        Ok(Some(f)) => f,
        Ok(None) => {
            return error_response(&ErrorKind::NotFound(format!(
                "original file {}",
                body.original_file_id
            )))
        }
        Err(e) => return internal(e),
    };
    if original.project_id != project_id {
        return error_response(&ErrorKind::Invalid(
            "original file belongs to another project".to_string(),
        ));
    }
    if body.modified_name.trim().is_empty() {
        return error_response(&ErrorKind::Invalid("modified_name cannot be empty".to_string()));
    }

    let now = now_ms();
    let mf = ModifiedFile {
        modified_file_id: Uuid::new_v4().to_string(),
        original_file_id: body.original_file_id,
        project_id,
        modified_name: body.modified_name,
        content: body.content,
        created_at_ms: now,
        updated_at_ms: now,
        orphaned: false,
    };
    match st.store.insert_modified_file(&mf).await {
        Ok(true) => (StatusCode::CREATED, Json(mf)).into_response(),
        Ok(false) => error_response(&ErrorKind::Conflict(format!(
            "override named {} already exists for this file",
            mf.modified_name
        ))),
        Err(e) => internal(e),
    }
}

pub async fn list_modified_files(
    State(st): State<AppState>,
    Path(project_id): Path<String>,
    Query(filter): Query<ModifiedFileFilter>,
) -> Response {
    match st
        .store
        .list_modified_files(&project_id, filter.original_file_id.as_deref())
        .await
    {
        Ok(files) => Json(json!({ "modified_files": files })).into_response(),
        Err(e) => internal(e),
    }
}

pub async fn get_modified_file(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    match st.store.get_modified_file(&id).await {
        Ok(Some(f)) => Json(f).into_response(),
        Ok(None) => error_response(&ErrorKind::NotFound(format!("modified file {id}"))),
        Err(e) => internal(e),
    }
}

pub async fn update_modified_file(
    State(st): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ModifiedFileUpdate>,
) -> Response {
    match st
        .store
        .update_modified_file(&id, &body.content, now_ms())
        .await
    {
        Ok(true) => match st.store.get_modified_file(&id).await {
            Ok(Some(f)) => Json(f).into_response(),
            Ok(None) => error_response(&ErrorKind::NotFound(format!("modified file {id}"))),
            Err(e) => internal(e),
        },
        Ok(false) => error_response(&ErrorKind::NotFound(format!("modified file {id}"))),
        Err(e) => internal(e),
    }
}

pub async fn delete_modified_file(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    match st.store.delete_modified_file(&id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(&ErrorKind::NotFound(format!("modified file {id}"))),
        Err(e) => internal(e),
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub async fn health(State(st): State<AppState>) -> Response {
    match st.store.ping().await {
        Ok(()) => Json(json!({"status": "ok", "service": "gauntlet-manager"})).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            error_response(&ErrorKind::Upstream("database unreachable".to_string()))
        }
    }
}
