//! HTTP API layer exposing the workspace commands.

mod extract;

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::{
        sse::{self, Sse},
        IntoResponse, Response,
    },
    routing::{get, patch, post},
    Json, Router,
};
use docspace_core::query::DEFAULT_LIMIT;
use docspace_core::snapshot::{SnapshotInfo, SnapshotManager};
use docspace_core::{
    Crumb, Entry, EntryId, EntryKind, ListOptions, ManifestItem, NewFile, Page, SortField,
    SortOrder, Workspace, WorkspaceError,
};
use futures::{future, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::content::ContentStore;
use crate::snapshot::persist_blocking;

pub use extract::{ApiJson, ApiPath, ApiQuery};

/// Caller identity, taken from the `X-User-Id` header set by the identity
/// service in front of us.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|user_id| Self {
                user_id: user_id.to_string(),
            })
            .ok_or(ApiError::Unauthorized)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub workspace: Arc<Workspace>,
    pub content: Arc<dyn ContentStore>,
    pub snapshots: Arc<SnapshotManager>,
    pub config: Arc<Config>,
}

#[derive(Debug)]
pub enum ApiError {
    Workspace(WorkspaceError),
    Unauthorized,
    /// Malformed path, query or body, rejected before reaching the workspace.
    BadRequest {
        kind: &'static str,
        message: String,
    },
    Internal(anyhow::Error),
}

impl From<WorkspaceError> for ApiError {
    fn from(err: WorkspaceError) -> Self {
        ApiError::Workspace(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

pub fn status_for(err: &WorkspaceError) -> StatusCode {
    match err {
        WorkspaceError::NotFound(_) => StatusCode::NOT_FOUND,
        WorkspaceError::InvalidTarget(_)
        | WorkspaceError::InvalidMove(_)
        | WorkspaceError::CycleDetected { .. }
        | WorkspaceError::InvalidName(_)
        | WorkspaceError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        WorkspaceError::NameConflict { .. }
        | WorkspaceError::NotEmpty(_)
        | WorkspaceError::AlreadyExists(_) => StatusCode::CONFLICT,
        WorkspaceError::Corrupted(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Workspace(err) => (status_for(&err), err.kind(), err.to_string()),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing X-User-Id header".to_string(),
            ),
            ApiError::BadRequest { kind, message } => (StatusCode::BAD_REQUEST, kind, message),
            ApiError::Internal(err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", format!("{:#}", err))
            }
        };
        if status.is_server_error() {
            error!(kind, %message, "request failed");
        }
        (status, Json(json!({ "error": kind, "message": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
struct ListParams {
    parent_id: Option<Uuid>,
    search: Option<String>,
    sort_by: Option<SortField>,
    order: Option<SortOrder>,
    limit: Option<usize>,
    offset: Option<usize>,
    kind: Option<EntryKind>,
    case_ref: Option<Uuid>,
}

#[derive(Serialize)]
struct PathResponse {
    breadcrumb: Vec<Crumb>,
}

#[derive(Deserialize)]
struct CreateFolderRequest {
    #[serde(default)]
    parent_id: Option<Uuid>,
    name: String,
}

#[derive(Deserialize)]
struct RegisterFileRequest {
    #[serde(default)]
    parent_id: Option<Uuid>,
    #[serde(default)]
    title: Option<String>,
    original_filename: String,
    size_bytes: u64,
    #[serde(default)]
    case_ref: Option<Uuid>,
}

#[derive(Deserialize)]
struct RenameRequest {
    name: String,
}

#[derive(Deserialize)]
struct MoveRequest {
    #[serde(default)]
    new_parent_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct CaseRequest {
    #[serde(default)]
    case_ref: Option<Uuid>,
}

#[derive(Deserialize)]
struct DeleteParams {
    #[serde(default)]
    cascade: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/entries", get(list_entries))
        .route("/entries/{id}", get(get_entry).delete(delete_entry))
        .route("/entries/{id}/path", get(entry_path))
        .route("/entries/{id}/rename", patch(rename_entry))
        .route("/entries/{id}/move", patch(move_entry))
        .route("/entries/{id}/case", patch(set_case))
        .route("/path", get(root_path))
        .route("/folders", post(create_folder))
        .route("/folders/{id}/manifest", get(export_manifest))
        .route("/files", post(register_file))
        .route("/snapshot", post(snapshot_now))
        .route("/snapshots", get(list_snapshots))
        .route("/events", get(events_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn list_entries(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> ApiResult<Json<Page>> {
    let max = state.config.max_page_size;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT.min(max));
    if limit > max {
        return Err(WorkspaceError::InvalidQuery(format!("limit may not exceed {}", max)).into());
    }
    let defaults = ListOptions::default();
    let opts = ListOptions {
        search: params.search,
        sort_by: params.sort_by.unwrap_or(defaults.sort_by),
        order: params.order.unwrap_or(defaults.order),
        limit,
        offset: params.offset.unwrap_or(0),
        kind: params.kind,
        case_ref: params.case_ref,
    };
    Ok(Json(state.workspace.list(params.parent_id, &opts)?))
}

async fn get_entry(State(state): State<AppState>, ApiPath(id): ApiPath<EntryId>) -> ApiResult<Json<Entry>> {
    Ok(Json(state.workspace.get(id)?))
}

async fn root_path(State(state): State<AppState>) -> ApiResult<Json<PathResponse>> {
    let breadcrumb = state.workspace.path(None)?;
    Ok(Json(PathResponse { breadcrumb }))
}

async fn entry_path(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<EntryId>,
) -> ApiResult<Json<PathResponse>> {
    let breadcrumb = state.workspace.path(Some(id))?;
    Ok(Json(PathResponse { breadcrumb }))
}

async fn create_folder(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiJson(req): ApiJson<CreateFolderRequest>,
) -> ApiResult<(StatusCode, Json<Entry>)> {
    let entry = state
        .workspace
        .create_folder(req.parent_id, &req.name, &auth.user_id)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn register_file(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiJson(req): ApiJson<RegisterFileRequest>,
) -> ApiResult<(StatusCode, Json<Entry>)> {
    let entry = state.workspace.register_file(
        req.parent_id,
        NewFile {
            title: req.title,
            original_filename: req.original_filename,
            size_bytes: req.size_bytes,
            created_by: auth.user_id,
            case_ref: req.case_ref,
        },
    )?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn rename_entry(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<EntryId>,
    _auth: AuthContext,
    ApiJson(req): ApiJson<RenameRequest>,
) -> ApiResult<Json<Entry>> {
    Ok(Json(state.workspace.rename(id, &req.name)?))
}

async fn move_entry(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<EntryId>,
    _auth: AuthContext,
    ApiJson(req): ApiJson<MoveRequest>,
) -> ApiResult<Json<Entry>> {
    Ok(Json(state.workspace.move_entry(id, req.new_parent_id)?))
}

async fn set_case(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<EntryId>,
    _auth: AuthContext,
    ApiJson(req): ApiJson<CaseRequest>,
) -> ApiResult<Json<Entry>> {
    Ok(Json(state.workspace.set_case(id, req.case_ref)?))
}

async fn delete_entry(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<EntryId>,
    ApiQuery(params): ApiQuery<DeleteParams>,
    auth: AuthContext,
) -> ApiResult<StatusCode> {
    let deleted = state.workspace.delete(id, params.cascade)?;
    info!(id = %id, user = %auth.user_id, removed = deleted.removed.len(), "delete requested");

    let files: Vec<EntryId> = deleted.removed_files().map(|e| e.id()).collect();
    if !files.is_empty() {
        tokio::spawn(purge_all(state.content.clone(), files));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Ask the byte store to drop each file. Failures are logged and skipped;
/// the entries are already gone. Returns how many purges failed.
pub async fn purge_all(content: Arc<dyn ContentStore>, ids: Vec<EntryId>) -> usize {
    let mut failed = 0;
    for id in ids {
        if let Err(err) = content.purge(id).await {
            failed += 1;
            warn!(id = %id, error = %err, "purging file content failed");
        }
    }
    failed
}

async fn export_manifest(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<EntryId>,
) -> ApiResult<Json<Vec<ManifestItem>>> {
    Ok(Json(state.workspace.export_manifest(id)?))
}

async fn snapshot_now(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> ApiResult<Json<SnapshotInfo>> {
    let info = persist_blocking(
        state.workspace.clone(),
        state.snapshots.clone(),
        state.config.snapshot_retention,
        true,
    )
    .await?;
    let info = info.ok_or_else(|| anyhow::anyhow!("forced snapshot produced nothing"))?;
    Ok(Json(info))
}

async fn list_snapshots(State(state): State<AppState>) -> ApiResult<Json<Vec<SnapshotInfo>>> {
    Ok(Json(state.snapshots.list()?))
}

async fn events_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<sse::Event, Infallible>>> {
    let rx = state.workspace.events().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|res| {
        // a lagging subscriber just misses events
        let event = res
            .ok()
            .and_then(|evt| serde_json::to_string(&evt).ok())
            .map(|data| Ok(sse::Event::default().data(data)));
        future::ready(event)
    });
    Sse::new(stream).keep_alive(sse::KeepAlive::default())
}
