//! Embedding gateway — wraps the external embedding model behind one trait.
//!
//! Two providers:
//! - [`openai::OpenAiEmbedder`] — any HTTP endpoint implementing `/embeddings`
//!   with the OpenAI wire shape (hosted APIs, Ollama, LM Studio…).
//! - [`hash::HashEmbedder`] — deterministic local vectors, no network. Used
//!   when no model is available and throughout the test suite.
//!
//! Callers never see wire types; failures surface as
//! [`AppError::ModelUnavailable`] so the readiness probe can report
//! `model_ok=false` instead of requests hanging.

pub mod hash;
pub mod openai;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::AppError;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one fixed-dimension vector per input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError>;

    /// Lightweight reachability probe for the readiness check.
    async fn ping(&self) -> Result<(), AppError>;

    fn model_name(&self) -> &str;

    /// Dimension known up front, if any. `None` means it is fixed by the
    /// first successful [`Embedder::embed_batch`] call.
    fn dimension_hint(&self) -> Option<usize>;
}

/// Construct the configured provider.
pub fn build(cfg: &EmbeddingConfig) -> Result<Box<dyn Embedder>, AppError> {
    match cfg.provider.as_str() {
        "hash" => Ok(Box::new(hash::HashEmbedder::new(cfg.dimension.unwrap_or(hash::DEFAULT_DIM)))),
        "openai" => Ok(Box::new(openai::OpenAiEmbedder::new(
            cfg.api_base_url.clone(),
            cfg.model.clone(),
            cfg.timeout_seconds,
            cfg.api_key.clone(),
        )?)),
        other => Err(AppError::Config(format!("unknown embedding provider: '{other}'"))),
    }
}

/// Drive [`Embedder::embed_batch`] in bounded batches.
///
/// One failed batch fails the whole call — partial embeddings are never
/// returned, so callers can zip results against inputs positionally.
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, AppError> {
    let batch_size = batch_size.max(1);
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size) {
        let mut vectors = embedder.embed_batch(batch).await?;
        if vectors.len() != batch.len() {
            return Err(AppError::ModelUnavailable(format!(
                "embedding backend returned {} vectors for {} inputs",
                vectors.len(),
                batch.len()
            )));
        }
        out.append(&mut vectors);
    }
    Ok(out)
}
