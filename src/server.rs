//! HTTP/WebSocket surface.
//!
//! Thin JSON handlers over the state store: mutations queue behind its
//! single-writer lock, reads serve a snapshot taken under that lock, and
//! one WebSocket per client streams progress deltas.

use axum::{
    Json, Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use camino::Utf8PathBuf;
use crboost_model::{JobKind, ParamValue};
use crboost_watch::ProgressEvent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::ServerError;
use crate::store::{CreateProjectRequest, ProjectStore};

type AppState = Arc<ProjectStore>;

/// Wire form of every failure: a stable kind plus a human message.
#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::Validation { .. }
            | ServerError::BadGlob { .. }
            | ServerError::MissingParameter { .. }
            | ServerError::SnapshotInvalid { .. } => StatusCode::BAD_REQUEST,
            ServerError::NotFound { .. } | ServerError::NoProject => StatusCode::NOT_FOUND,
            ServerError::FrozenJob { .. }
            | ServerError::PipelineActive
            | ServerError::NotRunning
            | ServerError::DuplicateImport { .. }
            | ServerError::Exists { .. } => StatusCode::CONFLICT,
            ServerError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(store: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/projects", post(create_project))
        .route("/api/projects/open", post(open_project))
        .route("/api/project", get(current))
        .route("/api/project/global", put(set_global))
        .route("/api/project/jobs", post(select_job))
        .route(
            "/api/project/jobs/{kind}",
            put(set_job_field).delete(deselect_job),
        )
        .route("/api/project/reset", post(reset_to_defaults))
        .route("/api/project/preset", post(apply_preset))
        .route("/api/project/import", post(import_more))
        .route("/api/aliases", get(aliases))
        .route("/api/pipeline/start", post(start_pipeline))
        .route("/api/pipeline/abort", post(abort_pipeline))
        .route("/api/pipeline/unlock", post(unlock_pipeline))
        .route("/api/pipeline/reset", post(reset_head))
        .route("/api/pipeline/log", get(log_tail))
        .route("/api/progress/ws", get(progress_ws))
        .with_state(store)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn create_project(
    State(store): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let view = store.create_project(request).await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
struct OpenRequest {
    path: Utf8PathBuf,
}

async fn open_project(
    State(store): State<AppState>,
    Json(request): Json<OpenRequest>,
) -> Result<impl IntoResponse, ServerError> {
    Ok(Json(store.open_project(&request.path).await?))
}

async fn current(State(store): State<AppState>) -> Result<impl IntoResponse, ServerError> {
    Ok(Json(store.current().await?))
}

#[derive(Debug, Deserialize)]
struct SetFieldRequest {
    field: String,
    value: ParamValue,
}

async fn set_global(
    State(store): State<AppState>,
    Json(request): Json<SetFieldRequest>,
) -> Result<impl IntoResponse, ServerError> {
    Ok(Json(
        store.set_global(&request.field, request.value).await?,
    ))
}

async fn set_job_field(
    State(store): State<AppState>,
    Path(kind): Path<JobKind>,
    Json(request): Json<SetFieldRequest>,
) -> Result<impl IntoResponse, ServerError> {
    Ok(Json(
        store
            .set_job_field(kind, &request.field, request.value)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct SelectRequest {
    kind: JobKind,
    position: usize,
}

async fn select_job(
    State(store): State<AppState>,
    Json(request): Json<SelectRequest>,
) -> Result<impl IntoResponse, ServerError> {
    Ok(Json(store.select_job(request.kind, request.position).await?))
}

async fn deselect_job(
    State(store): State<AppState>,
    Path(kind): Path<JobKind>,
) -> Result<impl IntoResponse, ServerError> {
    Ok(Json(store.deselect_job(kind).await?))
}

async fn reset_to_defaults(
    State(store): State<AppState>,
) -> Result<impl IntoResponse, ServerError> {
    Ok(Json(store.reset_to_defaults().await?))
}

#[derive(Debug, Deserialize)]
struct PresetRequest {
    preset: String,
}

async fn apply_preset(
    State(store): State<AppState>,
    Json(request): Json<PresetRequest>,
) -> Result<impl IntoResponse, ServerError> {
    Ok(Json(store.apply_preset(&request.preset).await?))
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    movies_glob: String,
    mdocs_glob: String,
}

async fn import_more(
    State(store): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> Result<impl IntoResponse, ServerError> {
    Ok(Json(
        store
            .import_more(&request.movies_glob, &request.mdocs_glob)
            .await?,
    ))
}

#[derive(Debug, Serialize)]
struct AliasEntry {
    scheme_name: String,
    label: String,
}

async fn aliases(State(store): State<AppState>) -> impl IntoResponse {
    let aliases: Vec<AliasEntry> = store
        .config()
        .aliases
        .iter()
        .map(|a| AliasEntry {
            scheme_name: a.scheme_name.clone(),
            label: a.label.clone(),
        })
        .collect();
    Json(aliases)
}

#[derive(Debug, Serialize)]
struct StartResponse {
    pid: u32,
}

async fn start_pipeline(
    State(store): State<AppState>,
) -> Result<impl IntoResponse, ServerError> {
    let pid = store.start_pipeline().await?;
    Ok(Json(StartResponse { pid }))
}

async fn abort_pipeline(
    State(store): State<AppState>,
) -> Result<impl IntoResponse, ServerError> {
    store.abort_pipeline().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unlock_pipeline(
    State(store): State<AppState>,
) -> Result<impl IntoResponse, ServerError> {
    store.unlock_pipeline().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reset_head(State(store): State<AppState>) -> Result<impl IntoResponse, ServerError> {
    store.reset_head().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    #[serde(default = "default_log_lines")]
    lines: usize,
}

fn default_log_lines() -> usize {
    200
}

async fn log_tail(
    State(store): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<impl IntoResponse, ServerError> {
    Ok(Json(store.log_tail(query.lines).await?))
}

async fn progress_ws(
    State(store): State<AppState>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let (view, receiver) = store.subscribe().await?;
    Ok(upgrade.on_upgrade(move |socket| stream_progress(socket, view, receiver)))
}


async fn stream_progress(
    mut socket: WebSocket,
    initial: crate::store::StateView,
    mut receiver: tokio::sync::broadcast::Receiver<ProgressEvent>,
) {
    // First frame: the state as of subscription, so the client never
    // renders from nothing.
    if let Ok(payload) = serde_json::to_string(&initial) {
        if socket.send(Message::Text(payload.into())).await.is_err() {
            return;
        }
    }
    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Ok(event) => {
                    let Ok(payload) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "progress subscriber lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            message = socket.recv() => match message {
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
}
