//! Embedding capability and an HTTP adapter for OpenAI-compatible servers.
//!
//! The engine only depends on [`Embedder`]. [`HttpEmbedder`] talks to any
//! server exposing `POST {base_url}/embeddings` (text-embeddings-inference,
//! vLLM, Ollama, OpenAI).

use std::future::Future;
use std::time::Duration;

use secdoc_core::{EmbeddingConfig, ScorerStage, SecdocError};
use serde::{Deserialize, Serialize};

/// Maps texts to fixed-length vectors, one per input, in input order.
///
/// Implementations must be deterministic for a given model version.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts.
    fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, SecdocError>> + Send;
}

/// Client for an OpenAI-compatible embeddings endpoint.
///
/// # Examples
///
/// ```
/// use secdoc_core::EmbeddingConfig;
/// use secdoc_retrieval::embedding::HttpEmbedder;
///
/// let embedder = HttpEmbedder::with_config(&EmbeddingConfig::default()).unwrap();
/// assert_eq!(embedder.model(), "intfloat/multilingual-e5-small");
/// ```
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDataItem>,
}

#[derive(Deserialize)]
struct EmbedDataItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl HttpEmbedder {
    /// Create a client from an [`EmbeddingConfig`].
    ///
    /// Falls back to the `EMBEDDING_API_KEY` env var if no key is configured.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::Config`] if the HTTP client cannot be built.
    pub fn with_config(config: &EmbeddingConfig) -> Result<Self, SecdocError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SecdocError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config
                .api_key
                .clone()
                .or_else(|| std::env::var("EMBEDDING_API_KEY").ok()),
        })
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SecdocError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let mut builder = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| fail(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".into());
            return Err(fail(format!("embedding server returned {status}: {body}")));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| fail(format!("failed to parse response: {e}")))?;

        order_embeddings(parsed, texts.len())
    }
}

/// Put vectors back in input order and check one came back per input.
fn order_embeddings(response: EmbedResponse, expected: usize) -> Result<Vec<Vec<f32>>, SecdocError> {
    if response.data.len() != expected {
        return Err(fail(format!(
            "expected {expected} embeddings, got {}",
            response.data.len()
        )));
    }
    let mut items = response.data;
    if items.iter().all(|item| item.index.is_some()) {
        items.sort_by_key(|item| item.index);
    }
    Ok(items.into_iter().map(|item| item.embedding).collect())
}

fn fail(message: String) -> SecdocError {
    SecdocError::scorer(ScorerStage::EmbeddingBuild, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_format_is_correct() {
        let texts = vec!["firewall".to_string(), "ไฟร์วอลล์".to_string()];
        let request = EmbedRequest {
            model: "intfloat/multilingual-e5-small",
            input: &texts,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "intfloat/multilingual-e5-small");
        assert_eq!(json["input"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn response_is_reordered_by_index() {
        let json = r#"{
            "data": [
                {"embedding": [0.4, 0.5], "index": 1},
                {"embedding": [0.1, 0.2], "index": 0}
            ]
        }"#;
        let response: EmbedResponse = serde_json::from_str(json).unwrap();
        let vectors = order_embeddings(response, 2).unwrap();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.4, 0.5]]);
    }

    #[test]
    fn response_without_index_keeps_order() {
        let json = r#"{"data": [{"embedding": [1.0]}, {"embedding": [2.0]}]}"#;
        let response: EmbedResponse = serde_json::from_str(json).unwrap();
        assert_eq!(order_embeddings(response, 2).unwrap(), vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn short_response_is_an_error() {
        let json = r#"{"data": [{"embedding": [1.0]}]}"#;
        let response: EmbedResponse = serde_json::from_str(json).unwrap();
        let err = order_embeddings(response, 3).unwrap_err();
        assert!(err.to_string().contains("expected 3 embeddings"));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let config = EmbeddingConfig {
            base_url: "http://embed:80/v1/".into(),
            ..EmbeddingConfig::default()
        };
        let embedder = HttpEmbedder::with_config(&config).unwrap();
        assert_eq!(embedder.base_url, "http://embed:80/v1");
    }
}
