//! HTTP surface — axum router, shared request state, auth middleware, and
//! the server loop with graceful shutdown.
//!
//! ## URL layout
//!
//! ```text
//! GET    /readyz
//! POST   /rag/ingest          POST /rag/ingest_file   POST /rag/ingest_dir
//! GET    /rag/search          GET  /rag/groups
//! GET    /index/info          GET  /index/ids
//! POST   /index/save          POST /index/load        POST /index/rebuild
//! DELETE /index/clear         DELETE /index/delete
//! GET    /kg/snapshot         GET  /kg/stats          GET /kg/query
//! POST   /kg/save             POST /kg/load           DELETE /kg/clear
//! ```
//!
//! Every `POST`/`DELETE` route requires `X-API-Key` when a key is
//! configured; without one the check is disabled entirely.

mod handlers;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::RagEngine;
use crate::error::AppError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Router state injected into every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RagEngine>,
    pub api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(engine: Arc<RagEngine>, api_key: Option<String>) -> Self {
        Self { engine, api_key: api_key.map(Arc::from) }
    }
}

// ── Error mapping ─────────────────────────────────────────────────────────────

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::CorruptState(_)
            | AppError::Config(_)
            | AppError::Logger(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(%status, error = %self, "request failed");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

// ── Auth middleware ───────────────────────────────────────────────────────────

/// Shared-secret check applied to all mutating routes. Missing header → 401,
/// wrong key → 403, no configured key → pass-through.
async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let Some(expected) = &state.api_key else {
        return Ok(next.run(req).await);
    };
    match req.headers().get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "missing X-API-Key header" })),
        )
            .into_response()),
        Some(got) if got != expected.as_ref() => Err((
            StatusCode::FORBIDDEN,
            Json(json!({ "detail": "invalid API key" })),
        )
            .into_response()),
        Some(_) => Ok(next.run(req).await),
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn build_router(state: AppState) -> Router {
    let mutating = Router::new()
        .route("/rag/ingest",      post(handlers::ingest))
        .route("/rag/ingest_file", post(handlers::ingest_file))
        .route("/rag/ingest_dir",  post(handlers::ingest_dir))
        .route("/index/save",      post(handlers::index_save))
        .route("/index/load",      post(handlers::index_load))
        .route("/index/rebuild",   post(handlers::index_rebuild))
        .route("/index/clear",     delete(handlers::index_clear))
        .route("/index/delete",    delete(handlers::index_delete))
        .route("/kg/save",         post(handlers::kg_save))
        .route("/kg/load",         post(handlers::kg_load))
        .route("/kg/clear",        delete(handlers::kg_clear))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    let read_only = Router::new()
        .route("/readyz",      get(handlers::readyz))
        .route("/rag/search",  get(handlers::search))
        .route("/rag/groups",  get(handlers::groups))
        .route("/index/info",  get(handlers::index_info))
        .route("/index/ids",   get(handlers::index_ids))
        .route("/kg/snapshot", get(handlers::kg_snapshot))
        .route("/kg/stats",    get(handlers::kg_stats))
        .route("/kg/query",    get(handlers::kg_query));

    read_only.merge(mutating).with_state(state)
}

// ── Server loop ───────────────────────────────────────────────────────────────

pub async fn serve(
    state: AppState,
    bind_addr: &str,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let router = build_router(state);
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| AppError::Config(format!("bind failed on {bind_addr}: {e}")))?;

    info!(%bind_addr, "http server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Io(std::io::Error::other(format!("server error: {e}"))))?;

    info!("http server shut down");
    Ok(())
}
