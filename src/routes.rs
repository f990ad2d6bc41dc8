use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Json, Router,
};
use parking_lot::RwLock;
use serde_json::json;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::{
    blobs::BlobStore,
    config::Config,
    fal::FalTransport,
    models::{RegenerateRequest, SelectionPatch, SourceImage},
    workflow::{Snapshot, Workflow, WorkflowError},
};

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<RwLock<HashMap<Uuid, Arc<Workflow>>>>,
    pub blobs: Arc<BlobStore>,
    pub transport: Arc<dyn FalTransport>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(transport: Arc<dyn FalTransport>) -> Self {
        Self {
            sessions: Arc::default(),
            blobs: Arc::new(BlobStore::new()),
            transport,
            max_upload_bytes: Config::default().max_upload_bytes,
        }
    }

    pub fn with_upload_limit(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    fn session(&self, id: &Uuid) -> Result<Arc<Workflow>, ApiError> {
        let workflow = self.sessions.read().get(id).cloned().ok_or(ApiError::NotFound)?;
        workflow.mark_seen();
        Ok(workflow)
    }

    /// Closes every session no client has touched for at least `ttl` and
    /// returns how many were closed.
    pub fn sweep_idle(&self, ttl: Duration) -> usize {
        let expired: Vec<Arc<Workflow>> = {
            let mut sessions = self.sessions.write();
            let ids: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, workflow)| workflow.idle_for() >= ttl)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        for workflow in &expired {
            tracing::info!("⌛ Session {} expired after {:?} idle", workflow.id(), ttl);
            workflow.teardown();
        }
        expired.len()
    }
}

/// Periodically closes abandoned sessions so their retained images are freed.
pub fn spawn_session_sweeper(state: AppState, ttl: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let closed = state.sweep_idle(ttl);
            if closed > 0 {
                tracing::info!("🧹 Closed {} idle sessions ({} still open)", closed, state.sessions.read().len());
            }
        }
    })
}

#[derive(Debug)]
pub enum ApiError {
    NotFound,
    BadRequest(String),
    Workflow(WorkflowError),
}

impl From<WorkflowError> for ApiError {
    fn from(e: WorkflowError) -> Self {
        ApiError::Workflow(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Workflow(e @ WorkflowError::MissingSource) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Workflow(e) => (StatusCode::CONFLICT, e.to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let upload_limit = state.max_upload_bytes;
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(close_session))
        .route("/api/sessions/:id/source", put(upload_source).get(source_preview))
        .route("/api/sessions/:id/selections", patch(update_selections))
        .route("/api/sessions/:id/generate", post(generate))
        .route("/api/sessions/:id/regenerate", post(regenerate))
        .route("/api/sessions/:id/reset", post(reset))
        .route("/api/sessions/:id/dismiss", post(dismiss_error))
        .route("/api/sessions/:id/animate/statue", post(animate_statue))
        .route("/api/sessions/:id/animate/confirm", post(confirm_last_frame))
        .route("/api/sessions/:id/animate/painting", post(animate_painting))
        .route("/api/sessions/:id/animate/back", post(back_to_image))
        .route("/api/sessions/:id/download", get(download_artwork))
        .route("/api/sessions/:id/video/download", get(download_video))
        .route("/api/blobs/:blob_id", get(get_blob))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "credentials": state.transport.has_credentials(),
        "sessions": state.sessions.read().len(),
        "blobs": state.blobs.stats(),
    }))
}

pub async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<Snapshot>) {
    let workflow = Workflow::new(Arc::clone(&state.transport), Arc::clone(&state.blobs));
    let snapshot = workflow.snapshot();
    state.sessions.write().insert(workflow.id(), workflow);
    tracing::info!("🆕 Created session {}", snapshot.id);
    (StatusCode::CREATED, Json(snapshot))
}

pub async fn get_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<Snapshot>, ApiError> {
    Ok(Json(state.session(&id)?.snapshot()))
}

pub async fn close_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    let workflow = state.sessions.write().remove(&id).ok_or(ApiError::NotFound)?;
    workflow.teardown();
    Ok(StatusCode::NO_CONTENT)
}

async fn read_image(mut multipart: Multipart) -> Result<SourceImage, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::BadRequest(e.to_string()))? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
        let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
        if bytes.is_empty() {
            return Err(ApiError::BadRequest("uploaded file is empty".into()));
        }
        return Ok(SourceImage { file_name, content_type, bytes });
    }
    Err(ApiError::BadRequest("missing multipart field 'file'".into()))
}

pub async fn upload_source(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Snapshot>, ApiError> {
    let workflow = state.session(&id)?;
    let source = read_image(multipart).await?;
    Ok(Json(workflow.set_source(source)?))
}

pub async fn source_preview(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Response, ApiError> {
    let source = state.session(&id)?.source().ok_or(ApiError::NotFound)?;
    Ok(([(header::CONTENT_TYPE, source.content_type.clone())], source.bytes.clone()).into_response())
}

pub async fn update_selections(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<SelectionPatch>,
) -> Result<Json<Snapshot>, ApiError> {
    Ok(Json(state.session(&id)?.update_selections(&body)?))
}

// Call-starting intents answer with the pending snapshot; the front-end polls
// the session until the call settles.
pub async fn generate(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<(StatusCode, Json<Snapshot>), ApiError> {
    let pending = state.session(&id)?.generate()?;
    Ok((StatusCode::ACCEPTED, Json(pending.snapshot)))
}

pub async fn regenerate(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    body: Option<Json<RegenerateRequest>>,
) -> Result<(StatusCode, Json<Snapshot>), ApiError> {
    let overrides = body.map(|Json(b)| b).unwrap_or_default();
    let pending = state.session(&id)?.regenerate(&overrides)?;
    Ok((StatusCode::ACCEPTED, Json(pending.snapshot)))
}

pub async fn animate_statue(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Snapshot>), ApiError> {
    let workflow = state.session(&id)?;
    let back_image = read_image(multipart).await?;
    let pending = workflow.animate_statue(back_image)?;
    Ok((StatusCode::ACCEPTED, Json(pending.snapshot)))
}

pub async fn confirm_last_frame(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<(StatusCode, Json<Snapshot>), ApiError> {
    let pending = state.session(&id)?.confirm_last_frame()?;
    Ok((StatusCode::ACCEPTED, Json(pending.snapshot)))
}

pub async fn animate_painting(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<(StatusCode, Json<Snapshot>), ApiError> {
    let pending = state.session(&id)?.animate_painting()?;
    Ok((StatusCode::ACCEPTED, Json(pending.snapshot)))
}

pub async fn back_to_image(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<Snapshot>, ApiError> {
    Ok(Json(state.session(&id)?.back_to_image()?))
}

pub async fn dismiss_error(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<Snapshot>, ApiError> {
    Ok(Json(state.session(&id)?.dismiss_error()?))
}

pub async fn reset(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<Snapshot>, ApiError> {
    Ok(Json(state.session(&id)?.reset()))
}

pub async fn download_artwork(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Response, ApiError> {
    let target = state.session(&id)?.download().ok_or(ApiError::NotFound)?;
    Ok(target.into_response())
}

pub async fn download_video(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Response, ApiError> {
    let target = state.session(&id)?.video_download().ok_or(ApiError::NotFound)?;
    Ok(target.into_response())
}

pub async fn get_blob(Path(blob_id): Path<Uuid>, State(state): State<AppState>) -> Result<Response, ApiError> {
    let blob = state.blobs.get(&blob_id).ok_or(ApiError::NotFound)?;
    Ok(([(header::CONTENT_TYPE, blob.content_type)], blob.bytes).into_response())
}
