//! Axum handlers for the retrieval API.
//!
//! Each handler receives [`AppState`] via [`axum::extract::State`], delegates
//! to [`crate::engine::RagEngine`], and returns JSON. Failures bubble up as
//! [`AppError`] and are mapped to HTTP statuses in [`super`].

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Multipart, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::AppState;
use crate::engine::IngestRequest;
use crate::error::AppError;

fn default_true() -> bool {
    true
}

fn default_top_k() -> usize {
    5
}

fn default_k() -> usize {
    3
}

fn default_max_items() -> usize {
    100
}

fn default_batch() -> usize {
    256
}

fn default_glob() -> String {
    "*".to_string()
}

// ── Readiness ─────────────────────────────────────────────────────────────────

/// GET /readyz
pub(super) async fn readyz(State(state): State<AppState>) -> Json<Value> {
    let r = state.engine.readiness().await;
    Json(json!({
        "model_ok": r.model_ok,
        "dim_ok": r.dim_ok,
        "index_docs": r.index_docs,
        "index_matrix_ok": r.index_matrix_ok,
        "kg_file_exists": r.kg_file_exists,
        "ts": r.ts,
    }))
}

// ── Ingest ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(super) struct IngestBody {
    text: Option<String>,
    path: Option<String>,
    doc_id: Option<String>,
    #[serde(default)]
    upsert: bool,
    #[serde(default)]
    save_index: bool,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// POST /rag/ingest
pub(super) async fn ingest(
    State(state): State<AppState>,
    Json(body): Json<IngestBody>,
) -> Result<Json<Value>, AppError> {
    let report = state
        .engine
        .ingest(IngestRequest {
            text: body.text,
            path: body.path,
            doc_id: body.doc_id,
            upsert: body.upsert,
            save_index: body.save_index,
            chunk_size: body.chunk_size,
            chunk_overlap: body.chunk_overlap,
            metadata: body.metadata,
        })
        .await?;
    Ok(Json(json!({
        "success": report.success,
        "inserted": report.inserted,
        "ids": report.ids,
        "size": report.size,
    })))
}

/// POST /rag/ingest_file — multipart upload, `file` field plus the same
/// options as `/rag/ingest` as text fields.
pub(super) async fn ingest_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut req = IngestRequest::default();
    let mut file_name = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                file_name = field.file_name().map(ToString::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("cannot read upload: {e}")))?;
                let text = String::from_utf8(bytes.to_vec())
                    .map_err(|_| AppError::Validation("uploaded file is not UTF-8 text".into()))?;
                req.text = Some(text);
            }
            other => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("cannot read field: {e}")))?;
                apply_option(&mut req, other, &value)?;
            }
        }
    }

    if req.text.is_none() {
        return Err(AppError::Validation("multipart body must include a 'file' field".into()));
    }
    if let Some(name) = file_name {
        req.metadata.entry("source".to_string()).or_insert(name);
    }

    let report = state.engine.ingest(req).await?;
    Ok(Json(json!({
        "success": report.success,
        "inserted": report.inserted,
        "ids": report.ids,
        "size": report.size,
    })))
}

fn apply_option(req: &mut IngestRequest, name: &str, value: &str) -> Result<(), AppError> {
    let parse_bool = |v: &str| -> Result<bool, AppError> {
        v.parse()
            .map_err(|_| AppError::Validation(format!("'{name}' must be true or false")))
    };
    let parse_usize = |v: &str| -> Result<usize, AppError> {
        v.parse()
            .map_err(|_| AppError::Validation(format!("'{name}' must be a non-negative integer")))
    };
    match name {
        "doc_id" => req.doc_id = Some(value.to_string()),
        "upsert" => req.upsert = parse_bool(value)?,
        "save_index" => req.save_index = parse_bool(value)?,
        "chunk_size" => req.chunk_size = Some(parse_usize(value)?),
        "chunk_overlap" => req.chunk_overlap = Some(parse_usize(value)?),
        // unknown fields ignored, matching JSON ingest behavior
        _ => {}
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub(super) struct IngestDirBody {
    dir_path: String,
    #[serde(default = "default_glob")]
    glob: String,
    limit: Option<usize>,
    #[serde(default)]
    upsert: bool,
    #[serde(default)]
    save_index: bool,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
}

/// POST /rag/ingest_dir
pub(super) async fn ingest_dir(
    State(state): State<AppState>,
    Json(body): Json<IngestDirBody>,
) -> Result<Json<Value>, AppError> {
    let report = state
        .engine
        .ingest_dir(
            &body.dir_path,
            &body.glob,
            body.limit,
            IngestRequest {
                upsert: body.upsert,
                save_index: body.save_index,
                chunk_size: body.chunk_size,
                chunk_overlap: body.chunk_overlap,
                ..Default::default()
            },
        )
        .await?;
    Ok(Json(json!({
        "success": report.success,
        "inserted": report.inserted,
        "size": report.size,
        "files": report.files,
    })))
}

// ── Search & groups ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(super) struct SearchParams {
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
}

/// GET /rag/search
pub(super) async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, AppError> {
    let items = state.engine.search(&params.query, params.top_k).await?;
    Ok(Json(json!({ "items": items })))
}

#[derive(Debug, Deserialize)]
pub(super) struct GroupsParams {
    #[serde(default = "default_k")]
    k: usize,
    #[serde(default = "default_max_items")]
    max_items: usize,
}

/// GET /rag/groups
pub(super) async fn groups(
    State(state): State<AppState>,
    Query(params): Query<GroupsParams>,
) -> Result<Json<Value>, AppError> {
    let groups = state.engine.groups(params.k, params.max_items).await?;
    Ok(Json(json!({ "success": true, "groups": groups })))
}

// ── Index lifecycle ───────────────────────────────────────────────────────────

/// GET /index/info
pub(super) async fn index_info(State(state): State<AppState>) -> Json<Value> {
    let info = state.engine.info().await;
    Json(json!({ "size": info.size, "dimension": info.dimension, "backend": info.backend }))
}

/// GET /index/ids
pub(super) async fn index_ids(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "ids": state.engine.ids().await }))
}

#[derive(Debug, Deserialize)]
pub(super) struct ClearParams {
    #[serde(default = "default_true")]
    remove_file: bool,
    #[serde(default = "default_true")]
    clear_kg: bool,
}

/// DELETE /index/clear
pub(super) async fn index_clear(
    State(state): State<AppState>,
    Query(params): Query<ClearParams>,
) -> Result<Json<Value>, AppError> {
    state.engine.clear(params.remove_file, params.clear_kg).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub(super) struct DeleteParams {
    doc_id: String,
}

/// DELETE /index/delete
pub(super) async fn index_delete(
    State(state): State<AppState>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<Value>, AppError> {
    state.engine.delete(&params.doc_id).await?;
    Ok(Json(json!({ "success": true })))
}

/// POST /index/save
pub(super) async fn index_save(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state.engine.save_index().await?;
    Ok(Json(json!({ "success": true })))
}

/// POST /index/load
pub(super) async fn index_load(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state.engine.load_index().await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub(super) struct RebuildParams {
    #[serde(default = "default_true")]
    reload_docs: bool,
    #[serde(default = "default_batch")]
    batch: usize,
    #[serde(default = "default_true")]
    save_index: bool,
}

/// POST /index/rebuild
pub(super) async fn index_rebuild(
    State(state): State<AppState>,
    Query(params): Query<RebuildParams>,
) -> Result<Json<Value>, AppError> {
    state
        .engine
        .rebuild(params.reload_docs, params.batch, params.save_index)
        .await?;
    Ok(Json(json!({ "success": true })))
}

// ── Knowledge graph ───────────────────────────────────────────────────────────

/// GET /kg/snapshot
pub(super) async fn kg_snapshot(State(state): State<AppState>) -> Json<Value> {
    let snap = state.engine.kg_snapshot().await;
    Json(json!({
        "success": true,
        "nodes": snap.nodes,
        "edges": snap.edges,
        "entities": snap.entities,
        "sample": { "emails": snap.sample_emails, "urls": snap.sample_urls },
    }))
}

/// GET /kg/stats
pub(super) async fn kg_stats(State(state): State<AppState>) -> Json<Value> {
    let (nodes, edges) = state.engine.kg_stats().await;
    Json(json!({ "nodes": nodes, "edges": edges, "ok": true }))
}

#[derive(Debug, Deserialize)]
pub(super) struct KgQueryParams {
    #[serde(rename = "type")]
    entity_type: String,
    value: String,
}

/// GET /kg/query
pub(super) async fn kg_query(
    State(state): State<AppState>,
    Query(params): Query<KgQueryParams>,
) -> Result<Json<Value>, AppError> {
    let docs = state.engine.kg_query(&params.entity_type, &params.value).await?;
    Ok(Json(json!({ "success": true, "count": docs.len(), "docs": docs })))
}

#[derive(Debug, Deserialize)]
pub(super) struct KgPathParams {
    path: Option<String>,
}

/// POST /kg/save
pub(super) async fn kg_save(
    State(state): State<AppState>,
    Query(params): Query<KgPathParams>,
) -> Result<Json<Value>, AppError> {
    state.engine.save_kg(params.path.as_deref()).await?;
    Ok(Json(json!({ "success": true })))
}

/// POST /kg/load
pub(super) async fn kg_load(
    State(state): State<AppState>,
    Query(params): Query<KgPathParams>,
) -> Result<Json<Value>, AppError> {
    state.engine.load_kg(params.path.as_deref()).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub(super) struct KgClearParams {
    #[serde(default = "default_true")]
    remove_file: bool,
}

/// DELETE /kg/clear
pub(super) async fn kg_clear(
    State(state): State<AppState>,
    Query(params): Query<KgClearParams>,
) -> Result<Json<Value>, AppError> {
    state.engine.clear_kg(params.remove_file).await?;
    Ok(Json(json!({ "success": true })))
}
