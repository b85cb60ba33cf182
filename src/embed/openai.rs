//! OpenAI-compatible embeddings provider (`/embeddings`).
//!
//! All wire types are private to this module — callers only see
//! `Vec<Vec<f32>>` or [`AppError::ModelUnavailable`]. This provider is
//! stateless; batching policy lives in [`super::embed_in_batches`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::AppError;

/// Adapter for any HTTP endpoint implementing the OpenAI `/embeddings` shape.
///
/// Constructed once at startup, then cheaply cloned because `reqwest::Client`
/// is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    api_base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiEmbedder {
    /// Build a provider from config values and an optional API key.
    ///
    /// `api_key` is `None` for keyless local models. When present it is sent
    /// as `Authorization: Bearer <key>` on every request.
    pub fn new(
        api_base_url: String,
        model: String,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| AppError::ModelUnavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, api_base_url, model, api_key })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.api_base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl super::Embedder for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let payload = EmbeddingsRequest { model: self.model.clone(), input: texts.to_vec() };
        debug!(model = %payload.model, inputs = texts.len(), "sending embeddings request");

        let mut req = self.client.post(self.endpoint()).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.endpoint(), error = %e, "embeddings HTTP request failed (transport)");
            AppError::ModelUnavailable(e.to_string())
        })?;
        let response = check_status(response).await?;

        let parsed = response.json::<EmbeddingsResponse>().await.map_err(|e| {
            error!(error = %e, "failed to deserialize embeddings response");
            AppError::ModelUnavailable(format!("failed to parse response body: {e}"))
        })?;

        // Providers may return data out of order; `index` is authoritative.
        let mut items = parsed.data;
        items.sort_by_key(|d| d.index);
        Ok(items.into_iter().map(|d| d.embedding).collect())
    }

    async fn ping(&self) -> Result<(), AppError> {
        // Any HTTP response (including 4xx) means the server is reachable;
        // only transport-level failure is treated as unreachable.
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::ModelUnavailable(format!("failed to build ping client: {e}")))?;
        let mut req = client.head(&self.api_base_url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req.send()
            .await
            .map(|_| ())
            .map_err(|e| AppError::ModelUnavailable(format!("unreachable: {e}")))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension_hint(&self) -> Option<usize> {
        None
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Consume the response and return it if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&body) {
        format!("HTTP {status}: {}", env.error.message)
    } else {
        format!("HTTP {status}: {body}")
    };

    error!(%status, %message, "embeddings request returned HTTP error");
    Err(AppError::ModelUnavailable(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let p = OpenAiEmbedder::new("http://localhost:8081/v1/".into(), "m".into(), 5, None)
            .expect("build");
        assert_eq!(p.endpoint(), "http://localhost:8081/v1/embeddings");
    }
}
