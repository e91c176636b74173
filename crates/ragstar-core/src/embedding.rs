//! OpenAI-compatible embedding client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::EmbeddingConfig;
use crate::error::{EmbedError, SearchError, SearchResult};

/// Most embedding APIs reject inputs past ~8K tokens
const MAX_INPUT_CHARS: usize = 8000;

/// Maps text to a dense vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Dimension of the produced vectors
    fn dimensions(&self) -> usize;
}

/// Embedding client for any `/embeddings` endpoint (OpenAI, Ollama, ...)
pub struct EmbeddingClient {
    config: EmbeddingConfig,
    client: Client,
    /// Actual dimensions detected from API response (0 = not yet detected)
    actual_dimensions: AtomicUsize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
    /// Only sent for models that support it (e.g. text-embedding-3-*)
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> SearchResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SearchError::Config(format!("embedding client: {e}")))?;

        Ok(Self {
            config,
            client,
            actual_dimensions: AtomicUsize::new(0),
        })
    }

    /// Dimension reported by the API so far, 0 before the first call
    pub fn actual_dimensions(&self) -> usize {
        self.actual_dimensions.load(Ordering::Relaxed)
    }

    /// Record the dimension of the first vector and reject later ones that
    /// differ from it
    fn check_dimensions(&self, detected: usize) -> Result<(), EmbedError> {
        match self.actual_dimensions.compare_exchange(
            0,
            detected,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                if detected != self.config.dimensions {
                    log::info!(
                        "[Embed] Auto-detected embedding dimensions: {} (configured {})",
                        detected,
                        self.config.dimensions
                    );
                }
                Ok(())
            }
            Err(current) if current == detected => Ok(()),
            Err(current) => Err(EmbedError::DimensionMismatch {
                expected: current,
                actual: detected,
            }),
        }
    }
}

fn truncate_input(text: &str) -> String {
    if text.chars().count() > MAX_INPUT_CHARS {
        text.chars().take(MAX_INPUT_CHARS).collect()
    } else {
        text.to_string()
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let url = format!("{}/embeddings", self.config.api_base.trim_end_matches('/'));

        // Only send dimensions for OpenAI text-embedding-3 models
        let dimensions = self
            .config
            .model
            .starts_with("text-embedding-3")
            .then_some(self.config.dimensions);

        let request = EmbeddingRequest {
            model: &self.config.model,
            input: vec![truncate_input(text)],
            dimensions,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(EmbedError::Api(error_response.error.message));
            }
            return Err(EmbedError::Api(format!("API error ({}): {}", status, body)));
        }

        let response: EmbeddingResponse =
            serde_json::from_str(&body).map_err(|e| EmbedError::Api(e.to_string()))?;

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        let embedding = data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or(EmbedError::Empty)?;

        self.check_dimensions(embedding.len())?;
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        match self.actual_dimensions() {
            0 => self.config.dimensions,
            actual => actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.model, "nomic-embed-text");
        assert_eq!(config.dimensions, 768);
    }

    #[test]
    fn test_truncate_input_counts_chars() {
        let long = "é".repeat(MAX_INPUT_CHARS + 10);
        assert_eq!(truncate_input(&long).chars().count(), MAX_INPUT_CHARS);
        assert_eq!(truncate_input("short"), "short");
    }

    #[test]
    fn test_dimension_detection_then_enforcement() {
        let client = EmbeddingClient::new(EmbeddingConfig::default()).unwrap();
        assert_eq!(client.dimensions(), 768);

        client.check_dimensions(384).unwrap();
        assert_eq!(client.dimensions(), 384);
        client.check_dimensions(384).unwrap();

        match client.check_dimensions(512) {
            Err(EmbedError::DimensionMismatch { expected, actual }) => {
                assert_eq!((expected, actual), (384, 512));
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_response_parsing_tolerates_missing_usage() {
        let body = r#"{"data":[{"embedding":[0.5,0.25],"index":0}],"model":"x"}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data[0].embedding, vec![0.5, 0.25]);
    }
}
