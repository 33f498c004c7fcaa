//! Cross-encoder reranking of merged candidates.
//!
//! The ensemble stage optimizes recall; this stage re-sorts its output
//! strictly by a pairwise (query, chunk) relevance score and keeps the top N.

use std::future::Future;
use std::time::Duration;

use secdoc_core::{Candidate, RankedChunk, RerankerConfig, ScorerStage, SecdocError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Scores (query, document) pairs jointly; higher means more relevant.
///
/// Returns one score per document, in input order. Scores are not assumed
/// to be comparable across calls.
pub trait RelevanceScorer: Send + Sync {
    /// Score every document in `documents` against `query`.
    fn score(
        &self,
        query: &str,
        documents: &[String],
    ) -> impl Future<Output = Result<Vec<f64>, SecdocError>> + Send;
}

/// Rerank `candidates` by pairwise relevance and keep at most `top_n`.
///
/// The ensemble score carried by each candidate is ignored. Equal scores keep
/// the candidates' incoming order. An empty candidate list returns an empty
/// result without calling the scorer.
///
/// # Errors
///
/// Returns [`SecdocError::Scorer`] if the scorer fails or returns the wrong
/// number of scores.
pub async fn rerank<S: RelevanceScorer>(
    scorer: &S,
    query: &str,
    candidates: Vec<Candidate>,
    top_n: usize,
) -> Result<Vec<RankedChunk>, SecdocError> {
    if candidates.is_empty() || top_n == 0 {
        return Ok(Vec::new());
    }

    let documents: Vec<String> = candidates.iter().map(|c| c.chunk.content.clone()).collect();
    let scores = scorer
        .score(query, &documents)
        .await
        .map_err(|e| e.in_stage(ScorerStage::Reranking))?;
    if scores.len() != candidates.len() {
        return Err(SecdocError::scorer(
            ScorerStage::Reranking,
            format!(
                "scorer returned {} scores for {} candidates",
                scores.len(),
                candidates.len()
            ),
        ));
    }

    let mut ranked: Vec<RankedChunk> = candidates
        .into_iter()
        .zip(scores)
        .map(|(candidate, score)| RankedChunk {
            chunk: candidate.chunk,
            score: if score.is_nan() { f64::NEG_INFINITY } else { score },
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(top_n);

    debug!(kept = ranked.len(), top_n, "reranked candidates");
    Ok(ranked)
}

/// Client for a text-embeddings-inference style `/rerank` endpoint.
///
/// # Examples
///
/// ```
/// use secdoc_core::RerankerConfig;
/// use secdoc_retrieval::rerank::HttpRelevanceScorer;
///
/// let scorer = HttpRelevanceScorer::with_config(&RerankerConfig::default()).unwrap();
/// assert_eq!(scorer.model(), "BAAI/bge-reranker-base");
/// ```
pub struct HttpRelevanceScorer {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpRelevanceScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRelevanceScorer")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    texts: &'a [String],
}

/// Servers answer either with a bare list or a `results` envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum RerankResponse {
    List(Vec<RerankItem>),
    Envelope { results: Vec<RerankItem> },
}

#[derive(Deserialize)]
struct RerankItem {
    index: usize,
    #[serde(alias = "relevance_score")]
    score: f64,
}

impl HttpRelevanceScorer {
    /// Create a client from a [`RerankerConfig`].
    ///
    /// Falls back to the `RERANKER_API_KEY` env var if no key is configured.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::Config`] if the HTTP client cannot be built.
    pub fn with_config(config: &RerankerConfig) -> Result<Self, SecdocError> {
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
                .or_else(|| std::env::var("RERANKER_API_KEY").ok()),
        })
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl RelevanceScorer for HttpRelevanceScorer {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f64>, SecdocError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let request = RerankRequest {
            model: &self.model,
            query,
            texts: documents,
        };
        let mut builder = self
            .client
            .post(format!("{}/rerank", self.base_url))
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
            return Err(fail(format!("rerank server returned {status}: {body}")));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| fail(format!("failed to parse response: {e}")))?;

        scores_in_input_order(parsed, documents.len())
    }
}

fn scores_in_input_order(response: RerankResponse, expected: usize) -> Result<Vec<f64>, SecdocError> {
    let items = match response {
        RerankResponse::List(items) | RerankResponse::Envelope { results: items } => items,
    };
    let mut scores: Vec<Option<f64>> = vec![None; expected];
    for item in items {
        let slot = scores
            .get_mut(item.index)
            .ok_or_else(|| fail(format!("score for unknown document index {}", item.index)))?;
        *slot = Some(item.score);
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| fail(format!("no score returned for document {i}"))))
        .collect()
}

fn fail(message: String) -> SecdocError {
    SecdocError::scorer(ScorerStage::Reranking, message)
}
