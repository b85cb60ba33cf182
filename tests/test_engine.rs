//! Integration tests for the retrieval engine: ingest, search, groups,
//! lifecycle operations, and persistence. Everything runs against the
//! offline hash embedder, so no network is needed.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use ragline::config::{ChunkingConfig, Config, EmbeddingConfig};
use ragline::embed::{self, Embedder};
use ragline::engine::{IngestRequest, RagEngine};
use ragline::error::AppError;
use tempfile::TempDir;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn test_config(work_dir: &Path) -> Config {
    Config {
        bind: "127.0.0.1:0".to_string(),
        api_key: None,
        work_dir: work_dir.to_path_buf(),
        log_level: "info".to_string(),
        log_file: None,
        chunking: ChunkingConfig { chunk_size: 200, chunk_overlap: 40, quality_threshold: 0.2 },
        embedding: EmbeddingConfig {
            provider: "hash".to_string(),
            api_base_url: String::new(),
            model: String::new(),
            dimension: Some(128),
            timeout_seconds: 5,
            batch_size: 8,
            api_key: None,
        },
    }
}

fn make_engine() -> (TempDir, RagEngine) {
    let temp = TempDir::new().expect("tempdir");
    let cfg = test_config(temp.path());
    let embedder = embed::build(&cfg.embedding).expect("embedder");
    (temp, RagEngine::new(cfg, embedder))
}

fn text_req(doc_id: &str, text: &str) -> IngestRequest {
    IngestRequest {
        text: Some(text.to_string()),
        doc_id: Some(doc_id.to_string()),
        ..Default::default()
    }
}

async fn ingest(engine: &RagEngine, doc_id: &str, text: &str) {
    let report = engine.ingest(text_req(doc_id, text)).await.expect("ingest");
    assert_eq!(report.inserted, 1);
}

// ── Ingest & dedup ────────────────────────────────────────────────────────────

#[tokio::test]
async fn ingest_reports_id_and_size() {
    let (_t, engine) = make_engine();
    let report = engine
        .ingest(text_req("d1", "a perfectly ordinary document about rust retrieval"))
        .await
        .expect("ingest");
    assert!(report.success);
    assert_eq!(report.ids, vec!["d1".to_string()]);
    assert_eq!(report.size, 1);
}

#[tokio::test]
async fn missing_id_derives_from_content() {
    let (_t, engine) = make_engine();
    let report = engine
        .ingest(IngestRequest {
            text: Some("content addressed document body with stable identity".to_string()),
            ..Default::default()
        })
        .await
        .expect("ingest");
    assert_eq!(report.ids[0].len(), 16);
}

#[tokio::test]
async fn duplicate_id_without_upsert_conflicts() {
    let (_t, engine) = make_engine();
    ingest(&engine, "d1", "the first version of this document text").await;
    let err = engine
        .ingest(text_req("d1", "a second version that must be refused"))
        .await
        .expect_err("conflict");
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(engine.info().await.size, 1);
}

#[tokio::test]
async fn upsert_replaces_content_without_growing_index() {
    let (_t, engine) = make_engine();
    ingest(&engine, "d1", "original text about kubernetes cluster operations").await;
    let mut req = text_req("d1", "replacement text about sourdough bread baking");
    req.upsert = true;
    engine.ingest(req).await.expect("upsert");
    assert_eq!(engine.info().await.size, 1);

    let hits = engine.search("sourdough bread", 5).await.expect("search");
    assert_eq!(hits[0].id, "d1");
    assert!(hits[0].snippet.contains("sourdough"));
}

/// Embedding backend whose output dimension changes between calls, as when
/// the remote model is swapped under a running service.
struct ShiftingDimEmbedder {
    dims: std::sync::Mutex<Vec<usize>>,
}

#[async_trait]
impl Embedder for ShiftingDimEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let mut dims = self.dims.lock().expect("lock");
        let dim = if dims.len() > 1 { dims.remove(0) } else { dims[0] };
        Ok(texts.iter().map(|_| vec![1.0; dim]).collect())
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    fn model_name(&self) -> &str {
        "shifting-dim"
    }

    fn dimension_hint(&self) -> Option<usize> {
        None
    }
}

#[tokio::test]
async fn failed_upsert_keeps_previous_document() {
    let temp = TempDir::new().expect("tempdir");
    let cfg = test_config(temp.path());
    let embedder = ShiftingDimEmbedder { dims: std::sync::Mutex::new(vec![8, 4]) };
    let engine = RagEngine::new(cfg, Box::new(embedder));

    ingest(&engine, "d1", "the original document stays put").await;

    let mut req = text_req("d1", "a replacement the backend cannot embed consistently");
    req.upsert = true;
    let err = engine.ingest(req).await.expect_err("dimension mismatch");
    assert!(matches!(err, AppError::Validation(_)));

    // The failed replace must leave the old document fully intact.
    assert_eq!(engine.ids().await, vec!["d1".to_string()]);
    assert_eq!(engine.info().await.size, 1);
    assert!(engine.readiness().await.index_matrix_ok);
}

#[tokio::test]
async fn low_quality_chunks_recorded_in_metadata() {
    let (t, engine) = make_engine();
    // The prose fits one window; the trailing punctuation noise lands in its
    // own window and is excluded by the quality stage.
    let prose = "the harbor authority publishes dredging schedules every spring, and the \
                 tide tables are reconciled against the channel survey before any vessel \
                 above the draft limit is cleared to enter";
    let noise = "!!! ??? *** ### $$$ %%% ^^^ &&& ((( )))";
    let mut req = text_req("mix", &format!("{prose}\n\n{noise}"));
    req.chunk_overlap = Some(0);
    req.save_index = true;
    engine.ingest(req).await.expect("ingest");

    let raw = fs::read_to_string(t.path().join("index.json")).expect("snapshot");
    let snap: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(snap["data"]["docs"]["mix"]["metadata"]["low_quality_chunks"], "1");
}

#[tokio::test]
async fn text_and_path_together_rejected() {
    let (t, engine) = make_engine();
    let file = t.path().join("doc.txt");
    fs::write(&file, "on disk").expect("write");
    let err = engine
        .ingest(IngestRequest {
            text: Some("inline".to_string()),
            path: Some(file.display().to_string()),
            ..Default::default()
        })
        .await
        .expect_err("rejected");
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn empty_text_rejected() {
    let (_t, engine) = make_engine();
    let err = engine
        .ingest(IngestRequest { text: Some("   \n".to_string()), ..Default::default() })
        .await
        .expect_err("rejected");
    assert!(matches!(err, AppError::Validation(_)));
}

// ── Search ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn search_round_trip_ranks_matching_doc_first() {
    let (_t, engine) = make_engine();
    ingest(&engine, "rust", "rust ownership borrowing lifetimes traits cargo").await;
    ingest(&engine, "cook", "simmer the onions then add garlic and paprika").await;
    ingest(&engine, "astro", "telescope aperture nebula galaxy redshift").await;

    let hits = engine.search("rust borrowing and lifetimes", 3).await.expect("search");
    assert_eq!(hits[0].id, "rust");
    assert!(hits[0].score >= hits[1].score);
}

#[tokio::test]
async fn search_results_are_document_granular() {
    let (_t, engine) = make_engine();
    // Long repetitive doc produces several chunks sharing vocabulary.
    let long = "vector index cosine similarity search ".repeat(30);
    ingest(&engine, "long", &long).await;
    ingest(&engine, "other", "an unrelated note about gardening tulips").await;

    let hits = engine.search("cosine similarity", 10).await.expect("search");
    let long_hits = hits.iter().filter(|h| h.id == "long").count();
    assert_eq!(long_hits, 1, "one hit per document, not per chunk");
}

#[tokio::test]
async fn search_bounds_enforced() {
    let (_t, engine) = make_engine();
    assert!(matches!(engine.search("q", 0).await, Err(AppError::Validation(_))));
    assert!(matches!(engine.search("q", 51).await, Err(AppError::Validation(_))));
    assert!(matches!(engine.search("", 5).await, Err(AppError::Validation(_))));
    assert!(engine.search("q", 50).await.expect("in range").is_empty());
}

// ── Groups ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn groups_partitions_documents() {
    let (_t, engine) = make_engine();
    ingest(&engine, "r1", "rust compiler borrow checker traits generics").await;
    ingest(&engine, "r2", "rust cargo crates compiler build traits").await;
    ingest(&engine, "c1", "flour butter sugar oven whisk frosting").await;
    ingest(&engine, "c2", "oven sugar flour cake butter cream").await;

    let groups = engine.groups(2, 100).await.expect("groups");
    let total: usize = groups.iter().map(|g| g.members.len()).sum();
    assert_eq!(total, 4, "every document assigned exactly once");
}

#[tokio::test]
async fn groups_bounds_enforced() {
    let (_t, engine) = make_engine();
    assert!(matches!(engine.groups(0, 100).await, Err(AppError::Validation(_))));
    assert!(matches!(engine.groups(51, 100).await, Err(AppError::Validation(_))));
    assert!(matches!(engine.groups(3, 0).await, Err(AppError::Validation(_))));
    assert!(matches!(engine.groups(3, 1001).await, Err(AppError::Validation(_))));
    assert!(engine.groups(3, 1000).await.expect("in range").is_empty());
}

// ── Delete & clear ────────────────────────────────────────────────────────────

#[tokio::test]
async fn delete_removes_doc_and_graph_edges() {
    let (_t, engine) = make_engine();
    ingest(&engine, "d1", "reach me at solo@example.com for details").await;
    engine.delete("d1").await.expect("delete");

    assert!(engine.ids().await.is_empty());
    let (nodes, edges) = engine.kg_stats().await;
    assert_eq!((nodes, edges), (0, 0), "nodes without edges are pruned");
}

#[tokio::test]
async fn delete_unknown_id_is_not_found() {
    let (_t, engine) = make_engine();
    assert!(matches!(engine.delete("ghost").await, Err(AppError::NotFound(_))));
    assert!(matches!(engine.delete("").await, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn clear_resets_index_and_kg_and_files() {
    let (t, engine) = make_engine();
    let mut req = text_req("d1", "write to a@b.com or visit http://x.com today");
    req.save_index = true;
    engine.ingest(req).await.expect("ingest");
    engine.save_kg(None).await.expect("save kg");
    assert!(t.path().join("index.json").exists());
    assert!(t.path().join("kg.json").exists());

    engine.clear(true, true).await.expect("clear");
    assert_eq!(engine.info().await.size, 0);
    assert_eq!(engine.kg_stats().await, (0, 0));
    assert!(!t.path().join("index.json").exists());
    assert!(!t.path().join("kg.json").exists());
}

// ── Persistence ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn save_then_load_restores_search() {
    let (t, engine) = make_engine();
    ingest(&engine, "d1", "persistent document about atomic snapshots").await;
    engine.save_index().await.expect("save");

    // Fresh engine over the same work dir.
    let cfg = test_config(t.path());
    let embedder = embed::build(&cfg.embedding).expect("embedder");
    let engine2 = RagEngine::new(cfg, embedder);
    engine2.load_index().await.expect("load");

    assert_eq!(engine2.ids().await, vec!["d1".to_string()]);
    let hits = engine2.search("atomic snapshots", 3).await.expect("search");
    assert_eq!(hits[0].id, "d1");
}

#[tokio::test]
async fn explicit_load_of_missing_snapshot_fails() {
    let (_t, engine) = make_engine();
    assert!(matches!(engine.load_index().await, Err(AppError::CorruptState(_))));
}

#[tokio::test]
async fn load_of_corrupt_snapshot_leaves_state_untouched() {
    let (t, engine) = make_engine();
    ingest(&engine, "keep", "the survivor document stays in memory").await;
    fs::write(t.path().join("index.json"), "{broken").expect("write");
    assert!(matches!(engine.load_index().await, Err(AppError::CorruptState(_))));
    assert_eq!(engine.ids().await, vec!["keep".to_string()]);
}

#[tokio::test]
async fn boot_tolerates_corrupt_snapshot() {
    let (t, _old) = make_engine();
    fs::write(t.path().join("index.json"), "not json at all").expect("write");
    let cfg = test_config(t.path());
    let embedder = embed::build(&cfg.embedding).expect("embedder");
    let engine = RagEngine::new(cfg, embedder);
    engine.boot().await.expect("boot starts empty");
    assert_eq!(engine.info().await.size, 0);
}

// ── Rebuild ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rebuild_preserves_ids_and_size() {
    let (_t, engine) = make_engine();
    ingest(&engine, "a", "first document about compilers and parsers").await;
    ingest(&engine, "b", "second document about sailing and knots").await;

    let before = engine.ids().await;
    engine.rebuild(true, 16, false).await.expect("rebuild");
    assert_eq!(engine.ids().await, before);
    assert_eq!(engine.info().await.size, 2);

    let hits = engine.search("compilers and parsers", 2).await.expect("search");
    assert_eq!(hits[0].id, "a");
}

#[tokio::test]
async fn rebuild_rereads_changed_files() {
    let (t, engine) = make_engine();
    let file = t.path().join("note.txt");
    fs::write(&file, "initial topic: medieval castle architecture").expect("write");
    engine
        .ingest(IngestRequest {
            path: Some(file.display().to_string()),
            doc_id: Some("note".to_string()),
            ..Default::default()
        })
        .await
        .expect("ingest");

    fs::write(&file, "new topic: deep sea submarine engineering").expect("rewrite");
    engine.rebuild(true, 16, false).await.expect("rebuild");

    let hits = engine.search("submarine engineering", 3).await.expect("search");
    assert_eq!(hits[0].id, "note");
    assert!(hits[0].snippet.contains("submarine"));
}

#[tokio::test]
async fn rebuild_batch_bounds_enforced() {
    let (_t, engine) = make_engine();
    assert!(matches!(engine.rebuild(false, 0, false).await, Err(AppError::Validation(_))));
    assert!(matches!(engine.rebuild(false, 4097, false).await, Err(AppError::Validation(_))));
}

// ── Directory ingest ──────────────────────────────────────────────────────────

#[tokio::test]
async fn ingest_dir_isolates_per_file_failures() {
    let (t, engine) = make_engine();
    let dir = t.path().join("docs");
    fs::create_dir(&dir).expect("mkdir");
    fs::write(dir.join("good.txt"), "a readable document about harbor cranes").expect("write");
    fs::write(dir.join("bad.txt"), [0xFFu8, 0xFE, 0x00, 0x01]).expect("write");
    fs::write(dir.join("skip.md"), "wrong extension, never touched").expect("write");

    let report = engine
        .ingest_dir(&dir.display().to_string(), "*.txt", None, IngestRequest::default())
        .await
        .expect("dir ingest");

    assert_eq!(report.files.len(), 2);
    assert_eq!(report.inserted, 1);
    let bad = report.files.iter().find(|f| f.path.ends_with("bad.txt")).expect("bad listed");
    assert!(!bad.success);
    assert!(bad.error.is_some());
    assert_eq!(engine.info().await.size, 1);
}

#[tokio::test]
async fn ingest_dir_respects_limit() {
    let (t, engine) = make_engine();
    let dir = t.path().join("many");
    fs::create_dir(&dir).expect("mkdir");
    for i in 0..5 {
        fs::write(dir.join(format!("f{i}.txt")), format!("document number {i} with body text"))
            .expect("write");
    }
    let report = engine
        .ingest_dir(&dir.display().to_string(), "*.txt", Some(2), IngestRequest::default())
        .await
        .expect("dir ingest");
    assert_eq!(report.inserted, 2);
}

// ── Readiness & info ──────────────────────────────────────────────────────────

#[tokio::test]
async fn readiness_reports_healthy_offline_engine() {
    let (_t, engine) = make_engine();
    ingest(&engine, "d1", "some indexed content for the readiness probe").await;
    let r = engine.readiness().await;
    assert!(r.model_ok);
    assert!(r.dim_ok);
    assert!(r.index_matrix_ok);
    assert_eq!(r.index_docs, 1);
    assert!(!r.ts.is_empty());
}

#[tokio::test]
async fn info_exposes_dimension_and_backend() {
    let (_t, engine) = make_engine();
    assert_eq!(engine.info().await.dimension, None);
    ingest(&engine, "d1", "dimension becomes known after the first embed").await;
    let info = engine.info().await;
    assert_eq!(info.dimension, Some(128));
    assert_eq!(info.backend, "hash-local");
}

#[tokio::test]
async fn chunk_overlap_override_validated_per_request() {
    let (_t, engine) = make_engine();
    let mut req = text_req("d1", "any text");
    req.chunk_size = Some(100);
    req.chunk_overlap = Some(100);
    assert!(matches!(engine.ingest(req).await, Err(AppError::Validation(_))));
}
