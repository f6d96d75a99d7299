//! HTTP client for the local embedder service (§4.8): OpenAI-shaped
//! `/v1/embeddings`, plus `/health` for the facade's startup probe.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbedderConfig;
use crate::error::{IndexError, IndexResult};

const EMBED_TIMEOUT: Duration = Duration::from_secs(300);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

pub struct LlamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    pub dims: usize,
}

impl LlamaEmbedder {
    pub fn new(cfg: &EmbedderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            dims: cfg.dims,
        }
    }

    pub async fn health(&self) -> bool {
        self.client
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// Embed a batch of chunk texts in one request. The service is expected
    /// to return embeddings in request order; a length mismatch is treated
    /// as a partial failure rather than silently zipping the wrong vectors
    /// onto the wrong chunks.
    pub async fn embed_batch(&self, texts: &[String]) -> IndexResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .timeout(EMBED_TIMEOUT)
            .json(&EmbeddingRequest { input: texts })
            .send()
            .await
            .map_err(|e| IndexError::EmbedderUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IndexError::EmbedderUnavailable(format!("status {}", response.status())));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| IndexError::EmbedderUnavailable(format!("malformed response: {e}")))?;

        if parsed.data.len() != texts.len() {
            return Err(IndexError::EmbedderPartialFailure { failed: texts.len() - parsed.data.len().min(texts.len()), total: texts.len() });
        }

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_stripped() {
        let embedder = LlamaEmbedder::new(&EmbedderConfig { base_url: "http://127.0.0.1:8088/".into(), dims: 8 });
        assert_eq!(embedder.base_url, "http://127.0.0.1:8088");
    }
}
