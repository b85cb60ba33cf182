//! Deterministic local embedding provider — no network, no model weights.
//! Used when no real backend is configured and throughout the test suite,
//! so the full ingest/search round-trip can run offline.
//!
//! Each lowercased token is hashed into a bucket with a sign bit; the bucket
//! counts are then L2-normalised. Texts sharing vocabulary land near each
//! other under cosine similarity, which is all the tests rely on.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::AppError;

pub const DEFAULT_DIM: usize = 384;

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes(digest[..8].try_into().unwrap_or_default());
            let idx = (bucket % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl super::Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    fn model_name(&self) -> &str {
        "hash-local"
    }

    fn dimension_hint(&self) -> Option<usize> {
        Some(self.dimension)
    }
}
