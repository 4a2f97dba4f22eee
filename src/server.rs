//! HTTP/JSON API server.
//!
//! Exposes the ingestion pipeline, query engine, upload-state manager, chat
//! session store, and maintenance service over REST.
//!
//! # Error Contract
//!
//! Success bodies carry `"success": true`. Failures carry:
//!
//! ```json
//! { "success": false, "error": "question must not be empty",
//!   "code": "empty_question", "detail": null }
//! ```
//!
//! # Upload lifecycle
//!
//! The upload handler validates format and size at the boundary, then runs
//! the pipeline inside `tokio::spawn` and awaits the join handle. A client
//! disconnect drops the response future but not the spawned task, so
//! ingestion finishes server-side and a reconnected client can observe it
//! through the upload-state endpoints.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::chat;
use crate::config::Config;
use crate::db;
use crate::index;
use crate::ingest::{self, IngestError};
use crate::locks::KeyedLocks;
use crate::maintenance;
use crate::migrate;
use crate::models::{ChatMessage, Source};
use crate::query::{self, QueryError};
use crate::store;
use crate::upload_state::{TrackedFile, UploadStateManager};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub upload_states: Arc<UploadStateManager>,
    /// Serializes ingest/delete per document filename.
    pub doc_locks: Arc<KeyedLocks>,
    /// Serializes chat saves per session id.
    pub session_locks: Arc<KeyedLocks>,
}

/// Build the router against an existing pool. Split out from [`run_server`]
/// so tests can drive the full HTTP surface in-process.
pub fn build_router(config: Arc<Config>, pool: SqlitePool) -> Router {
    let max_upload = config.server.max_upload_bytes;
    let state = AppState {
        upload_states: Arc::new(UploadStateManager::new(Duration::from_secs(
            config.upload_state.idle_ttl_secs,
        ))),
        doc_locks: Arc::new(KeyedLocks::new()),
        session_locks: Arc::new(KeyedLocks::new()),
        config,
        pool,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Multipart framing adds overhead on top of the file itself.
    let body_limit = max_upload + 64 * 1024;

    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/upload", post(handle_upload))
        .route("/query", post(handle_query))
        .route("/documents", get(handle_list_documents))
        .route("/documents/{filename}", delete(handle_delete_document))
        .route("/upload-state/create", post(handle_create_upload_state))
        .route(
            "/upload-state/{id}",
            get(handle_get_upload_state)
                .put(handle_update_upload_state)
                .delete(handle_delete_upload_state),
        )
        .route(
            "/maintenance/check-consistency",
            get(handle_check_consistency),
        )
        .route(
            "/maintenance/cleanup-orphaned",
            post(handle_cleanup_orphaned),
        )
        .route("/chat/save-session", post(handle_save_session))
        .route("/chat/load-session", get(handle_load_current_session))
        .route("/chat/sessions", get(handle_list_sessions))
        .route(
            "/chat/sessions/{id}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route(
            "/chat/sessions/{id}/set-current",
            post(handle_set_current_session),
        )
        .route("/chat/new-session", post(handle_new_session))
        .route(
            "/chat/current-session",
            delete(handle_clear_current_session),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run migrations, bind, and serve until the process terminates.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    migrate::run_migrations(config).await?;
    store::ensure_dirs(&config.storage)?;

    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    let app = build_router(Arc::new(config.clone()), pool);

    info!(bind = %bind_addr, "docdex API listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error body: `success` is always false, `code` is machine-readable.
#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    code: String,
    detail: Option<String>,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    detail: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.message,
            code: self.code,
            detail: self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
        detail: None,
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn internal_error(err: anyhow::Error) -> AppError {
    error!(error = %err, "internal error");
    app_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "internal server error",
    )
}

fn ingest_error(err: IngestError) -> AppError {
    let message = err.to_string();
    match err {
        IngestError::InvalidFormat(_) => {
            app_error(StatusCode::BAD_REQUEST, "invalid_format", message)
        }
        IngestError::FileTooLarge { .. } => {
            app_error(StatusCode::PAYLOAD_TOO_LARGE, "file_too_large", message)
        }
        IngestError::DuplicateFilename(_) => {
            app_error(StatusCode::CONFLICT, "duplicate_filename", message)
        }
        IngestError::ExtractionFailed(_) => {
            app_error(StatusCode::UNPROCESSABLE_ENTITY, "extraction_failed", message)
        }
        IngestError::EmbeddingFailed(_) => {
            app_error(StatusCode::BAD_GATEWAY, "embedding_failed", message)
        }
        IngestError::StorageFailed(_) => {
            app_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_failed", message)
        }
    }
}

fn query_error(err: QueryError) -> AppError {
    match err {
        QueryError::EmptyQuestion => {
            app_error(StatusCode::BAD_REQUEST, "empty_question", err.to_string())
        }
        QueryError::LlmUnavailable(_) => {
            app_error(StatusCode::BAD_GATEWAY, "llm_unavailable", err.to_string())
        }
    }
}

// ============ Health and status ============

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let documents = store::list_documents(&state.pool)
        .await
        .map_err(internal_error)?;
    let vectors = index::count(&state.pool).await.map_err(internal_error)?;

    Ok(Json(serde_json::json!({
        "success": true,
        "document_count": documents.len(),
        "vector_count": vectors,
        "retrieval": {
            "top_k": state.config.retrieval.top_k,
            "top_k_max": state.config.retrieval.top_k_max,
            "similarity_threshold": state.config.retrieval.similarity_threshold,
            "max_context_chars": state.config.retrieval.max_context_chars,
        },
        "embedding_model": state.config.embedding.model,
        "llm_model": state.config.llm.model,
    })))
}

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    filename: String,
    processing_time: f64,
    chunks_created: i64,
    summarized: bool,
    file_info: FileInfo,
}

#[derive(Serialize)]
struct FileInfo {
    size: i64,
    pages: i64,
    character_count: i64,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut summarize = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                filename = field.file_name().map(sanitize_filename);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;
                file_bytes = Some(bytes.to_vec());
            }
            Some("summarize") => {
                let value = field.text().await.unwrap_or_default();
                summarize = matches!(value.trim(), "true" | "1" | "on");
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| bad_request("missing 'file' field"))?;
    let filename = filename
        .filter(|f| !f.is_empty())
        .ok_or_else(|| bad_request("uploaded file has no filename"))?;

    // Boundary checks: rejected requests never enter the pipeline.
    if !crate::extract::is_supported_filename(&filename) {
        return Err(app_error(
            StatusCode::BAD_REQUEST,
            "invalid_format",
            format!("only PDF uploads are supported, got '{}'", filename),
        ));
    }
    if bytes.len() > state.config.server.max_upload_bytes {
        return Err(app_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            "file_too_large",
            format!(
                "file is {} bytes, limit is {}",
                bytes.len(),
                state.config.server.max_upload_bytes
            ),
        ));
    }

    let size_bytes = bytes.len() as i64;

    // Run the pipeline in a spawned task: once the bytes are received,
    // ingestion belongs to the server, not the request future. Dropping
    // this handler (client disconnect) does not cancel the work.
    let config = state.config.clone();
    let pool = state.pool.clone();
    let doc_locks = state.doc_locks.clone();
    let task_filename = filename.clone();
    let handle = tokio::spawn(async move {
        let lock = doc_locks.lock_for(&task_filename).await;
        let _guard = lock.lock().await;
        ingest::ingest(&config, &pool, &bytes, &task_filename, summarize).await
    });

    let report = handle
        .await
        .map_err(|e| internal_error(anyhow::anyhow!("ingestion task panicked: {}", e)))?
        .map_err(ingest_error)?;

    Ok(Json(UploadResponse {
        success: true,
        filename: report.filename,
        processing_time: report.processing_time_ms as f64 / 1000.0,
        chunks_created: report.chunks_created,
        summarized: report.summarized,
        file_info: FileInfo {
            size: size_bytes,
            pages: report.pages_processed,
            character_count: report.characters_extracted,
        },
    }))
}

/// Strip any path components a client might smuggle into the filename.
fn sanitize_filename(name: &str) -> String {
    std::path::Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default = "default_use_rag")]
    use_rag: bool,
}

fn default_use_rag() -> bool {
    true
}

#[derive(Serialize)]
struct QueryResponse {
    success: bool,
    answer: String,
    sources: Vec<Source>,
    processing_time: f64,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let outcome = query::answer(
        &state.config,
        &state.pool,
        &req.question,
        req.top_k,
        req.use_rag,
    )
    .await
    .map_err(query_error)?;

    Ok(Json(QueryResponse {
        success: true,
        answer: outcome.answer,
        sources: outcome.sources,
        processing_time: outcome.processing_time_ms as f64 / 1000.0,
    }))
}

// ============ Documents ============

async fn handle_list_documents(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let documents = store::list_documents(&state.pool)
        .await
        .map_err(internal_error)?;

    let documents: Vec<serde_json::Value> = documents
        .iter()
        .map(|d| {
            serde_json::json!({
                "filename": d.filename,
                "size": d.size_bytes,
                "pages": d.page_count,
                "chunks": d.chunk_count,
                "character_count": d.character_count,
                "summarized": d.summarized,
                "processed_at": d.processed_at,
                "status": "completed",
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "success": true,
        "documents": documents,
    })))
}

#[derive(Deserialize)]
struct DeleteDocumentParams {
    #[serde(default)]
    force: bool,
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(params): Query<DeleteDocumentParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let filename = sanitize_filename(&filename);

    let lock = state.doc_locks.lock_for(&filename).await;
    let _guard = lock.lock().await;

    let outcome = store::delete_document(&state.config.storage, &state.pool, &filename, params.force)
        .await
        .map_err(internal_error)?;

    if !outcome.found && !params.force {
        return Err(not_found(format!("no document named '{}'", filename)));
    }

    Ok(Json(serde_json::json!({
        "success": true,
        "filename": filename,
        "removed_items": outcome.removed_items,
        "errors": outcome.errors,
    })))
}

// ============ Upload state ============

async fn handle_create_upload_state(State(state): State<AppState>) -> Json<serde_json::Value> {
    let state_id = state.upload_states.create().await;
    Json(serde_json::json!({ "success": true, "state_id": state_id }))
}

async fn handle_get_upload_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let files = state
        .upload_states
        .get(&id)
        .await
        .ok_or_else(|| not_found("upload state not found or expired"))?;
    Ok(Json(serde_json::json!({ "success": true, "files": files })))
}

#[derive(Deserialize)]
struct UpdateUploadStateRequest {
    files: Vec<TrackedFile>,
}

async fn handle_update_upload_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateUploadStateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !state.upload_states.update(&id, req.files).await {
        return Err(not_found("upload state not found or expired"));
    }
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn handle_delete_upload_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    state.upload_states.delete(&id).await;
    Json(serde_json::json!({ "success": true }))
}

// ============ Maintenance ============

async fn handle_check_consistency(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let report = maintenance::check_consistency(&state.config, &state.pool)
        .await
        .map_err(internal_error)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "consistent": report.consistent,
        "issues": report.issues,
    })))
}

async fn handle_cleanup_orphaned(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let report = maintenance::cleanup_orphaned(&state.config, &state.pool)
        .await
        .map_err(internal_error)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "cleaned_count": report.cleaned_count,
        "orphaned_files": report.orphaned_files,
        "errors": report.errors,
    })))
}

// ============ Chat sessions ============

#[derive(Deserialize)]
struct IncomingMessage {
    #[serde(default)]
    id: Option<String>,
    role: String,
    content: String,
    #[serde(default)]
    sources: Option<Vec<Source>>,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Deserialize)]
struct SaveSessionRequest {
    #[serde(default)]
    session_id: Option<String>,
    messages: Vec<IncomingMessage>,
}

async fn handle_save_session(
    State(state): State<AppState>,
    Json(req): Json<SaveSessionRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    for message in &req.messages {
        if message.role != "user" && message.role != "assistant" {
            return Err(bad_request(format!(
                "invalid message role '{}', expected user or assistant",
                message.role
            )));
        }
    }

    let messages: Vec<ChatMessage> = req
        .messages
        .into_iter()
        .map(|m| ChatMessage {
            id: m.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            role: m.role,
            content: m.content,
            sources: m.sources,
            timestamp: m.timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp()),
        })
        .collect();

    // Concurrent saves to one session serialize on its lock. A save without
    // an id targets the current session when one is set, so the lock key is
    // resolved the same way; only true session creation contends on the
    // shared slot.
    let lock_key = match &req.session_id {
        Some(id) => id.clone(),
        None => chat::current_session_id(&state.pool)
            .await
            .map_err(internal_error)?
            .unwrap_or_else(|| "__unassigned__".to_string()),
    };
    let lock = state.session_locks.lock_for(&lock_key).await;
    let _guard = lock.lock().await;

    let session_id = chat::save_session(&state.pool, req.session_id.as_deref(), &messages)
        .await
        .map_err(internal_error)?;

    Ok(Json(serde_json::json!({
        "success": true,
        "session_id": session_id,
    })))
}

async fn handle_load_current_session(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    match chat::load_current(&state.pool).await.map_err(internal_error)? {
        Some((summary, messages)) => Ok(Json(serde_json::json!({
            "success": true,
            "session": { "summary": summary, "messages": messages },
        }))),
        None => Ok(Json(serde_json::json!({
            "success": true,
            "session": serde_json::Value::Null,
        }))),
    }
}

async fn handle_list_sessions(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let sessions = chat::list_sessions(&state.pool)
        .await
        .map_err(internal_error)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "sessions": sessions,
    })))
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (summary, messages) = chat::load_session(&state.pool, &id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found(format!("no session with id '{}'", id)))?;
    Ok(Json(serde_json::json!({
        "success": true,
        "session": { "summary": summary, "messages": messages },
    })))
}

async fn handle_set_current_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !chat::set_current(&state.pool, &id).await.map_err(internal_error)? {
        return Err(not_found(format!("no session with id '{}'", id)));
    }
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let lock = state.session_locks.lock_for(&id).await;
    let _guard = lock.lock().await;

    if !chat::delete_session(&state.pool, &id).await.map_err(internal_error)? {
        return Err(not_found(format!("no session with id '{}'", id)));
    }
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn handle_new_session(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let session_id = chat::new_session(&state.pool).await.map_err(internal_error)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "session_id": session_id,
    })))
}

async fn handle_clear_current_session(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    chat::clear_current(&state.pool).await.map_err(internal_error)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

