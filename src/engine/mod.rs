//! Retrieval engine — owns the document set, the vector index, and the
//! knowledge graph behind one service object constructed at startup and
//! shared with every request handler. No ambient globals.
//!
//! Locking: all state sits behind one `RwLock`. Reads (search, groups,
//! info, kg queries) proceed in parallel; mutations take the write lock for
//! the duration of their atomic swap. Embedding calls always happen outside
//! the lock, so a slow model never blocks readers.

pub mod chunker;
pub mod groups;
pub mod index;
pub mod persist;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::embed::{self, Embedder};
use crate::error::AppError;
use crate::kg::{EntityType, GraphSnapshot, GraphStore, extract};
use chunker::ChunkParams;
use groups::Group;
use index::VectorIndex;

pub const MAX_TOP_K: usize = 50;
pub const MAX_GROUP_K: usize = 50;
pub const MAX_GROUP_ITEMS: usize = 1000;
pub const MAX_REBUILD_BATCH: usize = crate::config::MAX_EMBED_BATCH;

const SNIPPET_LEN: usize = 160;
const CONTENT_ID_LEN: usize = 16;

// ── Data model ────────────────────────────────────────────────────────────────

/// A stored chunk: the text behind one index row, kept for snippets and
/// rebuild. Row `ord` in the index addresses `chunks[ord]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub quality: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub path: Option<String>,
    pub metadata: HashMap<String, String>,
    pub chunks: Vec<StoredChunk>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Default)]
struct EngineState {
    docs: HashMap<String, Document>,
    index: VectorIndex,
    graph: GraphStore,
}

/// On-disk form of the document set plus the index.
#[derive(Debug, Serialize, Deserialize)]
struct IndexSnapshot {
    docs: HashMap<String, Document>,
    index: VectorIndex,
}

// ── Request/response types ────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct IngestRequest {
    pub text: Option<String>,
    pub path: Option<String>,
    pub doc_id: Option<String>,
    pub upsert: bool,
    pub save_index: bool,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub success: bool,
    pub inserted: usize,
    pub ids: Vec<String>,
    pub size: usize,
}

#[derive(Debug, Serialize)]
pub struct FileOutcome {
    pub path: String,
    pub success: bool,
    pub inserted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DirReport {
    pub success: bool,
    pub files: Vec<FileOutcome>,
    pub inserted: usize,
    pub size: usize,
}

#[derive(Debug, Serialize)]
pub struct SearchItem {
    pub id: String,
    pub score: f32,
    pub snippet: String,
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IndexInfo {
    pub size: usize,
    pub dimension: Option<usize>,
    pub backend: String,
}

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub model_ok: bool,
    pub dim_ok: bool,
    pub index_docs: usize,
    pub index_matrix_ok: bool,
    pub kg_file_exists: bool,
    pub ts: String,
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct RagEngine {
    state: RwLock<EngineState>,
    embedder: Box<dyn Embedder>,
    config: Config,
}

impl RagEngine {
    pub fn new(config: Config, embedder: Box<dyn Embedder>) -> Self {
        Self { state: RwLock::new(EngineState::default()), embedder, config }
    }

    /// Load snapshots from the work dir. Missing files start empty; a
    /// corrupt snapshot at boot is logged and skipped rather than refusing
    /// to start.
    pub async fn boot(&self) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        match persist::load::<IndexSnapshot>(&self.config.index_path()) {
            Ok(Some(snap)) => {
                state.docs = snap.docs;
                state.index = snap.index;
                state.index.rebuild_matrix();
                info!(docs = state.docs.len(), "index snapshot restored");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "index snapshot unreadable, starting empty"),
        }
        match persist::load::<GraphStore>(&self.config.kg_path()) {
            Ok(Some(graph)) => {
                state.graph = graph;
                info!(nodes = state.graph.node_count(), "knowledge graph restored");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "kg snapshot unreadable, starting empty"),
        }
        Ok(())
    }

    pub fn backend(&self) -> &str {
        self.embedder.model_name()
    }

    // ── Ingest ────────────────────────────────────────────────────────────

    pub async fn ingest(&self, req: IngestRequest) -> Result<IngestReport, AppError> {
        let text = match (&req.text, &req.path) {
            (Some(t), None) => t.clone(),
            (None, Some(p)) => fs::read_to_string(p)
                .map_err(|e| AppError::Validation(format!("cannot read {p}: {e}")))?,
            (Some(_), Some(_)) => {
                return Err(AppError::Validation("provide text or path, not both".into()));
            }
            (None, None) => {
                return Err(AppError::Validation("either text or path is required".into()));
            }
        };
        if text.trim().is_empty() {
            return Err(AppError::Validation("document text is empty".into()));
        }

        let params =
            ChunkParams::resolve(&self.config.chunking, req.chunk_size, req.chunk_overlap)?;
        let doc_id = req
            .doc_id
            .clone()
            .unwrap_or_else(|| content_id(&text));

        // Fail before spending embedding calls on a doomed insert. The
        // check repeats under the write lock below.
        if !req.upsert {
            let state = self.state.read().await;
            if state.docs.contains_key(&doc_id) {
                return Err(AppError::Conflict(format!("document exists: {doc_id}")));
            }
        }

        let mut metadata = req.metadata.clone();
        metadata.insert("chunk_size".to_string(), params.chunk_size.to_string());
        metadata.insert("chunk_overlap".to_string(), params.chunk_overlap.to_string());
        if let Some(p) = &req.path {
            metadata.entry("source".to_string()).or_insert_with(|| p.clone());
        }

        let prepared = self.chunk_and_embed(&text, &params, &metadata, None).await?;
        if prepared.chunks.is_empty() {
            return Err(AppError::Validation(
                "document produced no eligible chunks after preprocessing".into(),
            ));
        }
        record_exclusions(&mut metadata, &prepared);
        let PreparedDoc { chunks, vectors, .. } = prepared;

        let chunk_count = chunks.len();
        let now = Utc::now().to_rfc3339();
        let mut state = self.state.write().await;

        // Validate the new vectors against the established index dimension
        // before touching existing state, so a failed upsert never destroys
        // the document it was meant to replace.
        if let Some(dim) = state.index.dimension() {
            if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
                return Err(AppError::Validation(format!(
                    "vector dimension {} does not match index dimension {dim}",
                    bad.len()
                )));
            }
        }

        let existing_created = state.docs.get(&doc_id).map(|d| d.created_at.clone());
        let created_at = match existing_created {
            Some(created) => {
                if !req.upsert {
                    return Err(AppError::Conflict(format!("document exists: {doc_id}")));
                }
                state.index.remove_doc(&doc_id);
                state.graph.remove_doc(&doc_id);
                state.docs.remove(&doc_id);
                created
            }
            None => now.clone(),
        };

        state.index.add_rows(&doc_id, vectors)?;
        state.graph.index_document(&doc_id, &text);
        state.docs.insert(
            doc_id.clone(),
            Document {
                id: doc_id.clone(),
                text,
                path: req.path.clone(),
                metadata,
                chunks,
                created_at,
                updated_at: now,
            },
        );

        let size = state.index.doc_count();
        if req.save_index {
            save_snapshot(&self.config.index_path(), &state)?;
        }
        info!(doc_id = %doc_id, chunks = chunk_count, size, "document ingested");
        Ok(IngestReport { success: true, inserted: 1, ids: vec![doc_id], size })
    }

    /// Ingest every file in a directory matching a `*.ext` glob, one at a
    /// time. Per-file failures land in the summary, never abort the batch.
    pub async fn ingest_dir(
        &self,
        dir_path: &str,
        glob: &str,
        limit: Option<usize>,
        base: IngestRequest,
    ) -> Result<DirReport, AppError> {
        let op = Uuid::now_v7();
        let mut paths: Vec<PathBuf> = fs::read_dir(dir_path)
            .map_err(|e| AppError::Validation(format!("cannot read dir {dir_path}: {e}")))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && glob_matches(glob, p))
            .collect();
        paths.sort();
        if let Some(limit) = limit {
            paths.truncate(limit);
        }
        info!(op = %op, dir = dir_path, files = paths.len(), "directory ingest started");

        let mut files = Vec::with_capacity(paths.len());
        let mut inserted = 0;
        for path in paths {
            let shown = path.display().to_string();
            let req = IngestRequest {
                text: None,
                path: Some(shown.clone()),
                doc_id: None,
                save_index: false,
                ..base.clone()
            };
            match self.ingest(req).await {
                Ok(report) => {
                    inserted += report.inserted;
                    files.push(FileOutcome {
                        path: shown,
                        success: true,
                        inserted: report.inserted,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(op = %op, path = %shown, error = %e, "file ingest failed");
                    files.push(FileOutcome {
                        path: shown,
                        success: false,
                        inserted: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let state = self.state.read().await;
        let size = state.index.doc_count();
        drop(state);
        if base.save_index && inserted > 0 {
            let state = self.state.read().await;
            save_snapshot(&self.config.index_path(), &state)?;
        }
        Ok(DirReport { success: true, files, inserted, size })
    }

    async fn chunk_and_embed(
        &self,
        text: &str,
        params: &ChunkParams,
        metadata: &HashMap<String, String>,
        batch_override: Option<usize>,
    ) -> Result<PreparedDoc, AppError> {
        let outcome = chunker::chunk_text(text, params, metadata)?;
        if outcome.rejected_safety > 0 || outcome.low_quality > 0 {
            info!(
                rejected = outcome.rejected_safety,
                low_quality = outcome.low_quality,
                "chunks excluded by preprocessing"
            );
        }
        let texts: Vec<String> = outcome.eligible.iter().map(|c| c.text.clone()).collect();
        let batch = batch_override.unwrap_or(self.config.embedding.batch_size);
        let vectors = embed::embed_in_batches(self.embedder.as_ref(), &texts, batch).await?;
        let chunks = outcome
            .eligible
            .into_iter()
            .map(|c| StoredChunk {
                text: c.text,
                start_offset: c.start_offset,
                end_offset: c.end_offset,
                quality: c.quality.unwrap_or(0.0),
            })
            .collect();
        Ok(PreparedDoc {
            chunks,
            vectors,
            rejected_safety: outcome.rejected_safety,
            low_quality: outcome.low_quality,
        })
    }

    // ── Queries ───────────────────────────────────────────────────────────

    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchItem>, AppError> {
        if query.is_empty() {
            return Err(AppError::Validation("query must not be empty".into()));
        }
        if top_k == 0 || top_k > MAX_TOP_K {
            return Err(AppError::Validation(format!("top_k must be 1..={MAX_TOP_K}")));
        }
        let query_text = [query.to_string()];
        let vectors = self.embedder.embed_batch(&query_text).await?;
        let query_vec = vectors
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ModelUnavailable("empty embedding response".into()))?;

        let state = self.state.read().await;
        let hits = state.index.search(&query_vec, top_k)?;
        Ok(hits
            .into_iter()
            .map(|h| {
                let (snippet, path) = state
                    .docs
                    .get(&h.doc_id)
                    .map(|d| (snippet_of(d, h.chunk_ord), d.path.clone()))
                    .unwrap_or_default();
                SearchItem { id: h.doc_id, score: h.score, snippet, path }
            })
            .collect())
    }

    /// Cluster up to `max_items` documents (insertion order) into `k`
    /// groups over their mean chunk vectors.
    pub async fn groups(&self, k: usize, max_items: usize) -> Result<Vec<Group>, AppError> {
        if k == 0 || k > MAX_GROUP_K {
            return Err(AppError::Validation(format!("k must be 1..={MAX_GROUP_K}")));
        }
        if max_items == 0 || max_items > MAX_GROUP_ITEMS {
            return Err(AppError::Validation(format!("max_items must be 1..={MAX_GROUP_ITEMS}")));
        }
        let state = self.state.read().await;
        let mut items: Vec<(String, Vec<f32>)> = Vec::new();
        for doc_id in state.index.doc_ids().into_iter().take(max_items) {
            if let Some(v) = mean_vector(&state.index, &doc_id) {
                items.push((doc_id, v));
            }
        }
        groups::kmeans_clustering(&items, k)
    }

    pub async fn kg_query(&self, type_str: &str, value: &str) -> Result<Vec<String>, AppError> {
        let entity_type = EntityType::parse(type_str)
            .ok_or_else(|| AppError::Validation(format!("unknown entity type: '{type_str}'")))?;
        if value.chars().count() < extract::MIN_VALUE_LEN {
            return Err(AppError::Validation(format!(
                "value must be at least {} characters",
                extract::MIN_VALUE_LEN
            )));
        }
        let state = self.state.read().await;
        Ok(state.graph.query(entity_type, value))
    }

    pub async fn kg_snapshot(&self) -> GraphSnapshot {
        self.state.read().await.graph.snapshot()
    }

    pub async fn kg_stats(&self) -> (usize, usize) {
        let state = self.state.read().await;
        (state.graph.node_count(), state.graph.edge_count())
    }

    pub async fn info(&self) -> IndexInfo {
        let state = self.state.read().await;
        IndexInfo {
            size: state.index.doc_count(),
            dimension: state.index.dimension(),
            backend: self.embedder.model_name().to_string(),
        }
    }

    pub async fn ids(&self) -> Vec<String> {
        self.state.read().await.index.doc_ids()
    }

    pub async fn readiness(&self) -> Readiness {
        let model_ok = self.embedder.ping().await.is_ok();
        let state = self.state.read().await;
        let expected = self.config.embedding.dimension.or(self.embedder.dimension_hint());
        let dim_ok = model_ok
            && match (expected, state.index.dimension()) {
                (Some(e), Some(d)) => e == d,
                _ => true,
            };
        Readiness {
            model_ok,
            dim_ok,
            index_docs: state.index.doc_count(),
            index_matrix_ok: state.index.matrix_ok(),
            kg_file_exists: self.config.kg_path().exists(),
            ts: Utc::now().to_rfc3339(),
        }
    }

    // ── Mutations ─────────────────────────────────────────────────────────

    pub async fn delete(&self, doc_id: &str) -> Result<(), AppError> {
        if doc_id.is_empty() {
            return Err(AppError::Validation("doc_id must not be empty".into()));
        }
        let mut state = self.state.write().await;
        if state.docs.remove(doc_id).is_none() {
            return Err(AppError::NotFound(format!("no document with id: {doc_id}")));
        }
        state.index.remove_doc(doc_id);
        state.graph.remove_doc(doc_id);
        info!(doc_id, "document deleted");
        Ok(())
    }

    pub async fn clear(&self, remove_file: bool, clear_kg: bool) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state.docs.clear();
        state.index.clear();
        if remove_file {
            persist::remove(&self.config.index_path())?;
        }
        if clear_kg {
            state.graph.clear();
            if remove_file {
                persist::remove(&self.config.kg_path())?;
            }
        }
        info!(remove_file, clear_kg, "index cleared");
        Ok(())
    }

    pub async fn save_index(&self) -> Result<(), AppError> {
        let state = self.state.read().await;
        save_snapshot(&self.config.index_path(), &state)
    }

    /// Replace in-memory docs and index from the snapshot on disk. Unlike
    /// boot, a missing or malformed file is an error and current state is
    /// left untouched.
    pub async fn load_index(&self) -> Result<(), AppError> {
        let snap = persist::load::<IndexSnapshot>(&self.config.index_path())?
            .ok_or_else(|| {
                AppError::CorruptState(format!(
                    "no snapshot at {}",
                    self.config.index_path().display()
                ))
            })?;
        let mut state = self.state.write().await;
        state.docs = snap.docs;
        state.index = snap.index;
        state.index.rebuild_matrix();
        info!(docs = state.docs.len(), "index snapshot loaded");
        Ok(())
    }

    pub async fn save_kg(&self, path: Option<&str>) -> Result<(), AppError> {
        let target = path.map(PathBuf::from).unwrap_or_else(|| self.config.kg_path());
        let state = self.state.read().await;
        persist::save(&target, &state.graph)
    }

    pub async fn load_kg(&self, path: Option<&str>) -> Result<(), AppError> {
        let target = path.map(PathBuf::from).unwrap_or_else(|| self.config.kg_path());
        let graph = persist::load::<GraphStore>(&target)?
            .ok_or_else(|| AppError::CorruptState(format!("no snapshot at {}", target.display())))?;
        let mut state = self.state.write().await;
        state.graph = graph;
        info!(nodes = state.graph.node_count(), "knowledge graph loaded");
        Ok(())
    }

    pub async fn clear_kg(&self, remove_file: bool) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state.graph.clear();
        if remove_file {
            persist::remove(&self.config.kg_path())?;
        }
        Ok(())
    }

    /// Recompute every stored document's chunks and embeddings, then swap
    /// the replacement in atomically. Readers keep serving the old index
    /// until the swap; on any failure the old state stays.
    pub async fn rebuild(
        &self,
        reload_docs: bool,
        batch: usize,
        save_index: bool,
    ) -> Result<(), AppError> {
        if batch == 0 || batch > MAX_REBUILD_BATCH {
            return Err(AppError::Validation(format!("batch must be 1..={MAX_REBUILD_BATCH}")));
        }
        let op = Uuid::now_v7();

        // Snapshot the documents, then work entirely off the clone.
        let docs: Vec<Document> = {
            let state = self.state.read().await;
            state
                .index
                .doc_ids()
                .into_iter()
                .filter_map(|id| state.docs.get(&id).cloned())
                .collect()
        };
        info!(op = %op, docs = docs.len(), reload_docs, "rebuild started");

        let mut new_docs = HashMap::with_capacity(docs.len());
        let mut new_index = VectorIndex::new();
        for mut doc in docs {
            if reload_docs {
                if let Some(p) = &doc.path {
                    doc.text = fs::read_to_string(p).map_err(|e| {
                        AppError::Validation(format!("cannot reload {p}: {e}"))
                    })?;
                }
            }
            let params = ChunkParams::resolve(
                &self.config.chunking,
                doc.metadata.get("chunk_size").and_then(|v| v.parse().ok()),
                doc.metadata.get("chunk_overlap").and_then(|v| v.parse().ok()),
            )?;
            let prepared = self
                .chunk_and_embed(&doc.text, &params, &doc.metadata, Some(batch))
                .await?;
            record_exclusions(&mut doc.metadata, &prepared);
            new_index.add_rows(&doc.id, prepared.vectors)?;
            doc.chunks = prepared.chunks;
            doc.updated_at = Utc::now().to_rfc3339();
            new_docs.insert(doc.id.clone(), doc);
        }

        let mut state = self.state.write().await;
        state.docs = new_docs;
        state.index = new_index;
        if save_index {
            save_snapshot(&self.config.index_path(), &state)?;
        }
        info!(op = %op, docs = state.docs.len(), "rebuild complete");
        Ok(())
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Preprocessed document ready for indexing: eligible chunks, their vectors,
/// and the counts of chunks the pipeline excluded.
struct PreparedDoc {
    chunks: Vec<StoredChunk>,
    vectors: Vec<Vec<f32>>,
    rejected_safety: usize,
    low_quality: usize,
}

/// Keep exclusion counts on the stored document. Excluded chunks never reach
/// the index, but their counts stay visible in metadata.
fn record_exclusions(metadata: &mut HashMap<String, String>, prepared: &PreparedDoc) {
    metadata.remove("rejected_chunks");
    metadata.remove("low_quality_chunks");
    if prepared.rejected_safety > 0 {
        metadata.insert("rejected_chunks".to_string(), prepared.rejected_safety.to_string());
    }
    if prepared.low_quality > 0 {
        metadata.insert("low_quality_chunks".to_string(), prepared.low_quality.to_string());
    }
}

fn save_snapshot(path: &Path, state: &EngineState) -> Result<(), AppError> {
    // Borrow docs and index together without cloning the whole state.
    #[derive(Serialize)]
    struct SnapshotRef<'a> {
        docs: &'a HashMap<String, Document>,
        index: &'a VectorIndex,
    }
    persist::save(path, &SnapshotRef { docs: &state.docs, index: &state.index })
}

/// Content-derived document id: prefix of the sha256 of the text.
pub fn content_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(digest)[..CONTENT_ID_LEN].to_string()
}

fn snippet_of(doc: &Document, chunk_ord: usize) -> String {
    let text = doc
        .chunks
        .get(chunk_ord)
        .map(|c| c.text.as_str())
        .unwrap_or(doc.text.as_str());
    let mut snippet: String = text.chars().take(SNIPPET_LEN).collect();
    if snippet.len() < text.len() {
        snippet.push('…');
    }
    snippet
}

/// Mean of all chunk vectors for one document.
fn mean_vector(idx: &VectorIndex, doc_id: &str) -> Option<Vec<f32>> {
    let rows: Vec<&index::Row> = idx.rows().iter().filter(|r| r.doc_id == doc_id).collect();
    let first = rows.first()?;
    let mut mean = vec![0.0f32; first.vector.len()];
    for row in &rows {
        for (m, x) in mean.iter_mut().zip(&row.vector) {
            *m += x;
        }
    }
    for m in &mut mean {
        *m /= rows.len() as f32;
    }
    Some(mean)
}

/// Minimal `*.ext` glob: `*` matches everything, `*.md` matches by suffix,
/// anything else is an exact file-name match.
fn glob_matches(glob: &str, path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };
    match glob.strip_prefix('*') {
        Some("") => true,
        Some(suffix) => name.ends_with(suffix),
        None => name == glob,
    }
}
