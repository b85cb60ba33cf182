//! Chunker/Preprocessor — overlapping window splitting plus a fixed
//! four-stage pipeline: normalize → safety-filter → quality-assess →
//! metadata-unify.
//!
//! Each stage is a pure `fn(StagedChunk, &StageCtx) -> Result<StagedChunk, Rejected>`
//! held in an ordered list, so stages can be tested (and reordered) without
//! touching ingest orchestration. The whole pipeline is idempotent for
//! identical input.

use std::collections::HashMap;

use text_splitter::{ChunkConfig, TextSplitter};

use crate::config::ChunkingConfig;
use crate::error::AppError;

// ── Parameters ────────────────────────────────────────────────────────────────

/// Effective chunking parameters for one ingest call: config defaults with
/// optional per-request overrides applied.
#[derive(Debug, Clone)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub quality_threshold: f32,
}

impl ChunkParams {
    /// Merge request overrides onto config defaults, validating the
    /// `chunk_overlap < chunk_size` contract.
    pub fn resolve(
        defaults: &ChunkingConfig,
        chunk_size: Option<usize>,
        chunk_overlap: Option<usize>,
    ) -> Result<Self, AppError> {
        let chunk_size = chunk_size.unwrap_or(defaults.chunk_size);
        let chunk_overlap = chunk_overlap.unwrap_or(defaults.chunk_overlap);
        if chunk_size == 0 {
            return Err(AppError::Validation("chunk_size must be > 0".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(AppError::Validation(format!(
                "chunk_overlap ({chunk_overlap}) must be < chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            quality_threshold: defaults.quality_threshold,
        })
    }
}

// ── Pipeline types ────────────────────────────────────────────────────────────

/// A chunk moving through the preprocessing pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedChunk {
    pub text: String,
    /// Byte offset of this window in the original document text.
    pub start_offset: usize,
    pub end_offset: usize,
    pub metadata: HashMap<String, String>,
    /// Set by the quality stage.
    pub quality: Option<f32>,
}

/// Why a stage dropped a chunk. Rejections never abort the document — they
/// are counted and reported per [`ChunkOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    Safety,
    LowQuality,
}

/// Per-call context shared by all stages.
pub struct StageCtx<'a> {
    pub doc_metadata: &'a HashMap<String, String>,
    pub quality_threshold: f32,
}

type Stage = fn(StagedChunk, &StageCtx) -> Result<StagedChunk, Rejected>;

/// The fixed stage order. Normalize must run first (later stages assume
/// canonical whitespace); metadata-unify must run last (it seals the record).
const STAGES: &[(&str, Stage)] = &[
    ("normalize", normalize),
    ("safety_filter", safety_filter),
    ("quality_assess", quality_assess),
    ("metadata_unify", metadata_unify),
];

/// Result of chunking one document.
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    /// Chunks that survived every stage, in document order, ready to embed.
    pub eligible: Vec<StagedChunk>,
    /// Chunks dropped by the safety filter.
    pub rejected_safety: usize,
    /// Chunks below the quality threshold (excluded from the index but
    /// recorded in document metadata).
    pub low_quality: usize,
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Split `text` into overlapping windows and run the full pipeline.
pub fn chunk_text(
    text: &str,
    params: &ChunkParams,
    doc_metadata: &HashMap<String, String>,
) -> Result<ChunkOutcome, AppError> {
    let cfg = ChunkConfig::new(params.chunk_size)
        .with_overlap(params.chunk_overlap)
        .map_err(|e| AppError::Validation(format!("invalid chunking parameters: {e}")))?;
    let splitter = TextSplitter::new(cfg);

    let ctx = StageCtx {
        doc_metadata,
        quality_threshold: params.quality_threshold,
    };

    let mut outcome = ChunkOutcome::default();
    for (idx, (pos, window)) in splitter
        .chunk_indices(text)
        .filter(|(_, t)| !t.trim().is_empty())
        .enumerate()
    {
        let chunk = StagedChunk {
            text: window.to_string(),
            start_offset: pos,
            end_offset: pos + window.len(),
            metadata: HashMap::from([("chunk_index".to_string(), idx.to_string())]),
            quality: None,
        };

        // Thread the chunk through the stage list; the first rejection
        // short-circuits the rest.
        let staged = STAGES.iter().try_fold(chunk, |c, (_, stage)| stage(c, &ctx));
        match staged {
            Ok(done) => outcome.eligible.push(done),
            Err(Rejected::Safety) => outcome.rejected_safety += 1,
            Err(Rejected::LowQuality) => outcome.low_quality += 1,
        }
    }
    Ok(outcome)
}

// ── Stages ────────────────────────────────────────────────────────────────────

/// Whitespace/encoding canonicalization. Never drops content: CRLF becomes LF,
/// horizontal whitespace runs collapse to one space, lines are trimmed.
fn normalize(mut chunk: StagedChunk, _ctx: &StageCtx) -> Result<StagedChunk, Rejected> {
    let mut out = String::with_capacity(chunk.text.len());
    for (i, line) in chunk.text.replace("\r\n", "\n").split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let mut prev_space = false;
        for c in line.trim().chars() {
            if c == ' ' || c == '\t' {
                if !prev_space {
                    out.push(' ');
                }
                prev_space = true;
            } else {
                out.push(c);
                prev_space = false;
            }
        }
    }
    chunk.text = out;
    Ok(chunk)
}

/// Strip control characters; reject chunks that are mostly undecodable.
///
/// A chunk where more than 20% of characters are U+FFFD replacement chars is
/// binary garbage from a bad extraction and is excluded from embedding.
fn safety_filter(mut chunk: StagedChunk, _ctx: &StageCtx) -> Result<StagedChunk, Rejected> {
    let total = chunk.text.chars().count().max(1);
    let replacement = chunk.text.chars().filter(|c| *c == '\u{FFFD}').count();
    if replacement * 5 > total {
        return Err(Rejected::Safety);
    }
    chunk
        .text
        .retain(|c| !c.is_control() || c == '\n' || c == '\t');
    if chunk.text.trim().is_empty() {
        return Err(Rejected::Safety);
    }
    Ok(chunk)
}

/// Score information density; exclude chunks below the configured threshold.
///
/// Score = alphanumeric share of all characters, damped for very short
/// chunks. A page of punctuation or a stray two-word fragment both score low.
fn quality_assess(mut chunk: StagedChunk, ctx: &StageCtx) -> Result<StagedChunk, Rejected> {
    let total = chunk.text.chars().count().max(1);
    let alnum = chunk.text.chars().filter(|c| c.is_alphanumeric()).count();
    let length_factor = (total as f32 / 24.0).min(1.0);
    let score = (alnum as f32 / total as f32) * length_factor;

    chunk.quality = Some(score);
    if score < ctx.quality_threshold {
        return Err(Rejected::LowQuality);
    }
    Ok(chunk)
}

/// Merge document-level metadata into the chunk record. Chunk-level keys win
/// on collision; offsets and the quality score are sealed in here.
fn metadata_unify(mut chunk: StagedChunk, ctx: &StageCtx) -> Result<StagedChunk, Rejected> {
    for (k, v) in ctx.doc_metadata {
        chunk.metadata.entry(k.clone()).or_insert_with(|| v.clone());
    }
    chunk
        .metadata
        .insert("start_offset".to_string(), chunk.start_offset.to_string());
    chunk
        .metadata
        .insert("end_offset".to_string(), chunk.end_offset.to_string());
    if let Some(q) = chunk.quality {
        chunk.metadata.insert("quality".to_string(), format!("{q:.3}"));
    }
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ChunkParams {
        ChunkParams { chunk_size: 40, chunk_overlap: 10, quality_threshold: 0.2 }
    }

    fn ctx_with<'a>(meta: &'a HashMap<String, String>) -> StageCtx<'a> {
        StageCtx { doc_metadata: meta, quality_threshold: 0.2 }
    }

    fn raw_chunk(text: &str) -> StagedChunk {
        StagedChunk {
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.len(),
            metadata: HashMap::new(),
            quality: None,
        }
    }

    #[test]
    fn resolve_rejects_overlap_ge_size() {
        let defaults = ChunkingConfig { chunk_size: 100, chunk_overlap: 20, quality_threshold: 0.2 };
        assert!(ChunkParams::resolve(&defaults, Some(50), Some(50)).is_err());
        assert!(ChunkParams::resolve(&defaults, Some(50), Some(60)).is_err());
        assert!(ChunkParams::resolve(&defaults, Some(50), Some(10)).is_ok());
    }

    #[test]
    fn normalize_collapses_whitespace_keeps_words() {
        let meta = HashMap::new();
        let out = normalize(raw_chunk("hello   world\t tabs\r\nnext  line"), &ctx_with(&meta))
            .expect("normalize never rejects");
        assert_eq!(out.text, "hello world tabs\nnext line");
    }

    #[test]
    fn safety_rejects_replacement_garbage() {
        let meta = HashMap::new();
        let garbage = "\u{FFFD}\u{FFFD}\u{FFFD}ab";
        assert_eq!(
            safety_filter(raw_chunk(garbage), &ctx_with(&meta)),
            Err(Rejected::Safety)
        );
    }

    #[test]
    fn safety_strips_control_chars() {
        let meta = HashMap::new();
        let out = safety_filter(raw_chunk("ok\u{0}text\u{7}here"), &ctx_with(&meta)).expect("pass");
        assert_eq!(out.text, "oktexthere");
    }

    #[test]
    fn quality_rejects_punctuation_noise() {
        let meta = HashMap::new();
        let noise = "!!! ??? *** ### $$$ %%% ^^^ &&&";
        assert_eq!(
            quality_assess(raw_chunk(noise), &ctx_with(&meta)),
            Err(Rejected::LowQuality)
        );
    }

    #[test]
    fn quality_accepts_prose() {
        let meta = HashMap::new();
        let prose = "a normal english sentence with enough words to count";
        let out = quality_assess(raw_chunk(prose), &ctx_with(&meta)).expect("prose passes");
        assert!(out.quality.expect("scored") > 0.5);
    }

    #[test]
    fn metadata_unify_chunk_keys_win() {
        let meta = HashMap::from([
            ("source".to_string(), "doc-level".to_string()),
            ("chunk_index".to_string(), "should-not-overwrite".to_string()),
        ]);
        let mut c = raw_chunk("body");
        c.metadata.insert("chunk_index".to_string(), "0".to_string());
        let out = metadata_unify(c, &ctx_with(&meta)).expect("unify");
        assert_eq!(out.metadata.get("chunk_index").map(String::as_str), Some("0"));
        assert_eq!(out.metadata.get("source").map(String::as_str), Some("doc-level"));
    }

    #[test]
    fn chunk_text_is_idempotent_for_identical_input() {
        let meta = HashMap::new();
        let text = "one two three four five six seven eight nine ten \
                    eleven twelve thirteen fourteen fifteen sixteen";
        let a = chunk_text(text, &params(), &meta).expect("first");
        let b = chunk_text(text, &params(), &meta).expect("second");
        assert_eq!(a.eligible, b.eligible);
        assert!(!a.eligible.is_empty());
    }

    #[test]
    fn chunk_text_windows_overlap() {
        let meta = HashMap::new();
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa \
                    lambda mu nu xi omicron pi rho sigma tau upsilon";
        let out = chunk_text(text, &params(), &meta).expect("chunk");
        assert!(out.eligible.len() >= 2, "text longer than one window");
        // Consecutive windows must share text when overlap is configured.
        let first_end = out.eligible[0].end_offset;
        let second_start = out.eligible[1].start_offset;
        assert!(second_start < first_end, "windows should overlap");
    }

    #[test]
    fn chunk_text_counts_safety_rejections() {
        let meta = HashMap::new();
        let garbage = "\u{FFFD}".repeat(30);
        let out = chunk_text(&garbage, &params(), &meta).expect("chunk");
        assert!(out.eligible.is_empty());
        assert_eq!(out.rejected_safety, 1);
    }

    #[test]
    fn chunk_text_counts_low_quality_windows() {
        let meta = HashMap::new();
        let out = chunk_text("!!! ??? *** ###", &params(), &meta).expect("chunk");
        assert!(out.eligible.is_empty());
        assert_eq!(out.low_quality, 1);
    }

    #[test]
    fn offsets_index_into_original_text() {
        let meta = HashMap::new();
        let text = "the quick brown fox jumps over the lazy dog again and again";
        let out = chunk_text(text, &params(), &meta).expect("chunk");
        for c in &out.eligible {
            assert!(c.end_offset <= text.len());
            assert!(c.start_offset < c.end_offset);
        }
    }
}
