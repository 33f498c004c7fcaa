//! Dense vector index with exhaustive inner-product search.
//!
//! Vectors are L2-normalized on the way in, so the inner product used for
//! ranking equals cosine similarity.

use secdoc_core::{Chunk, ScorerStage, SecdocError};
use tracing::debug;

use crate::embedding::Embedder;
use crate::hit::{sort_descending, SearchHit, SearchSource};

/// Embedding index over chunk content.
#[derive(Debug, Clone)]
pub struct SemanticIndex {
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
    dimensions: usize,
}

impl SemanticIndex {
    /// Embed `chunks` in batches of `batch_size` and index them.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::Scorer`] if any batch fails, or if the embedder
    /// returns the wrong number of vectors or mixed dimensions. No chunk is
    /// ever silently dropped.
    pub async fn build<E: Embedder>(
        chunks: Vec<Chunk>,
        embedder: &E,
        batch_size: usize,
    ) -> Result<Self, SecdocError> {
        let batch_size = batch_size.max(1);
        let mut vectors = Vec::with_capacity(chunks.len());

        for (i, batch) in chunks.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let embedded = embedder
                .embed(&texts)
                .await
                .map_err(|e| e.in_stage(ScorerStage::EmbeddingBuild))?;
            if embedded.len() != texts.len() {
                return Err(SecdocError::scorer(
                    ScorerStage::EmbeddingBuild,
                    format!(
                        "batch {i}: embedder returned {} vectors for {} chunks",
                        embedded.len(),
                        texts.len()
                    ),
                ));
            }
            vectors.extend(embedded);
            debug!(batch = i, embedded = vectors.len(), total = chunks.len(), "embedded batch");
        }

        Self::from_parts(chunks, vectors)
    }

    /// Assemble an index from chunks and their vectors (normalizing them).
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::Scorer`] if counts differ or dimensions are
    /// inconsistent.
    ///
    /// # Examples
    ///
    /// ```
    /// use secdoc_core::{Chunk, Language};
    /// use secdoc_retrieval::semantic::SemanticIndex;
    ///
    /// let chunk = Chunk {
    ///     id: "a".into(),
    ///     content: "encrypt data at rest".into(),
    ///     source: "pci-dss.pdf".into(),
    ///     logical_page: "3".into(),
    ///     language: Language::English,
    /// };
    /// let index = SemanticIndex::from_parts(vec![chunk], vec![vec![3.0, 4.0]]).unwrap();
    /// let hits = index.search_vector(&[0.6, 0.8], 1);
    /// assert!((hits[0].score - 1.0).abs() < 1e-6);
    /// ```
    pub fn from_parts(chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self, SecdocError> {
        let vectors = vectors.into_iter().map(normalize).collect();
        Self::restore(chunks, vectors)
    }

    /// Assemble an index from already-normalized vectors, as persisted.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::Scorer`] if counts differ, dimensions are
    /// inconsistent, or a component is NaN or infinite.
    pub fn restore(chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self, SecdocError> {
        if chunks.len() != vectors.len() {
            return Err(SecdocError::scorer(
                ScorerStage::EmbeddingBuild,
                format!("{} chunks but {} vectors", chunks.len(), vectors.len()),
            ));
        }
        let dimensions = vectors.first().map_or(0, Vec::len);
        if let Some(bad) = vectors.iter().position(|v| v.len() != dimensions || v.is_empty()) {
            return Err(SecdocError::scorer(
                ScorerStage::EmbeddingBuild,
                format!(
                    "vector {bad} has {} dimensions, expected {dimensions}",
                    vectors[bad].len()
                ),
            ));
        }
        if let Some(bad) = vectors.iter().position(|v| v.iter().any(|x| !x.is_finite())) {
            return Err(SecdocError::scorer(
                ScorerStage::EmbeddingBuild,
                format!("vector {bad} has a non-finite component"),
            ));
        }
        Ok(Self {
            chunks,
            vectors,
            dimensions,
        })
    }

    /// Embed `text` and return the `k` most similar chunks.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::Scorer`] if the query cannot be embedded.
    pub async fn query<E: Embedder>(
        &self,
        embedder: &E,
        text: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>, SecdocError> {
        if self.chunks.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let embedded = embedder
            .embed(&[text.to_string()])
            .await
            .map_err(|e| e.in_stage(ScorerStage::EmbeddingQuery))?;
        let query = embedded.into_iter().next().ok_or_else(|| {
            SecdocError::scorer(ScorerStage::EmbeddingQuery, "embedder returned no vector")
        })?;
        if query.len() != self.dimensions {
            return Err(SecdocError::scorer(
                ScorerStage::EmbeddingQuery,
                format!(
                    "query has {} dimensions, index has {}",
                    query.len(),
                    self.dimensions
                ),
            ));
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(SecdocError::scorer(
                ScorerStage::EmbeddingQuery,
                "query vector has a non-finite component",
            ));
        }
        Ok(self.search_vector(&normalize(query), k))
    }

    /// Rank stored vectors by inner product with `query`.
    pub fn search_vector(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        let mut scored: Vec<(f64, &Chunk)> = self
            .vectors
            .iter()
            .zip(&self.chunks)
            .map(|(v, chunk)| (inner_product(query, v), chunk))
            .collect();
        sort_descending(&mut scored);
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(score, chunk)| SearchHit {
                chunk: chunk.clone(),
                score,
                source: SearchSource::Semantic,
            })
            .collect()
    }

    /// Indexed chunks in insertion order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Stored (normalized) vectors, parallel to [`Self::chunks`].
    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    /// Vector dimensionality (0 for an empty index).
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x = (f64::from(*x) / norm) as f32;
        }
    }
    v
}

fn inner_product(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum()
}
