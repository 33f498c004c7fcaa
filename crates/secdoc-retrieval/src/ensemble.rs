//! Weighted fusion of the lexical and semantic result lists.
//!
//! Each list is rescaled within itself (by rank or by min-max), weighted, and
//! summed per chunk. A chunk missing from one list contributes 0 for that side.

use std::collections::HashMap;

use secdoc_core::{Candidate, FusionMethod, RetrievalConfig, SecdocError};
use tracing::debug;

use crate::embedding::Embedder;
use crate::hit::{sort_descending, SearchHit};
use crate::lexical::LexicalIndex;
use crate::semantic::SemanticIndex;

/// Merges ranked lists from both indexes into one candidate list.
///
/// # Examples
///
/// ```
/// use secdoc_core::{Chunk, Language, Origin, RetrievalConfig};
/// use secdoc_retrieval::ensemble::EnsembleMerger;
/// use secdoc_retrieval::hit::{SearchHit, SearchSource};
///
/// let hit = |id: &str, source| SearchHit {
///     chunk: Chunk {
///         id: id.into(),
///         content: String::new(),
///         source: "nist.pdf".into(),
///         logical_page: "1".into(),
///         language: Language::English,
///     },
///     score: 1.0,
///     source,
/// };
/// let merger = EnsembleMerger::new(&RetrievalConfig::default());
/// let merged = merger.merge(
///     vec![hit("a", SearchSource::Lexical), hit("b", SearchSource::Lexical)],
///     vec![hit("b", SearchSource::Semantic)],
/// );
/// assert_eq!(merged[0].chunk.id, "b");
/// assert_eq!(merged[0].origin, Origin::Both);
/// ```
#[derive(Debug, Clone)]
pub struct EnsembleMerger {
    lexical_weight: f64,
    semantic_weight: f64,
    fusion: FusionMethod,
    rank_constant: f64,
    retrieval_k: usize,
}

impl EnsembleMerger {
    /// Create a merger from the retrieval settings.
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            lexical_weight: config.lexical_weight,
            semantic_weight: config.semantic_weight,
            fusion: config.fusion,
            rank_constant: config.rank_constant as f64,
            retrieval_k: config.retrieval_k,
        }
    }

    /// Query both indexes with `query` and merge their results.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::Scorer`] if the query cannot be embedded.
    pub async fn search<E: Embedder>(
        &self,
        lexical: &LexicalIndex,
        semantic: &SemanticIndex,
        embedder: &E,
        query: &str,
    ) -> Result<Vec<Candidate>, SecdocError> {
        let lexical_hits = lexical.query(query, self.retrieval_k);
        let semantic_hits = semantic.query(embedder, query, self.retrieval_k).await?;
        debug!(
            lexical = lexical_hits.len(),
            semantic = semantic_hits.len(),
            "retrieved from both indexes"
        );
        Ok(self.merge(lexical_hits, semantic_hits))
    }

    /// Fuse two ranked lists, deduplicating by chunk id.
    ///
    /// The result is sorted by combined score, highest first. Ties keep
    /// first-seen order, lexical list first.
    pub fn merge(&self, lexical: Vec<SearchHit>, semantic: Vec<SearchHit>) -> Vec<Candidate> {
        let mut merged: Vec<Candidate> = Vec::with_capacity(lexical.len() + semantic.len());
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (hits, weight) in [
            (lexical, self.lexical_weight),
            (semantic, self.semantic_weight),
        ] {
            let normalized = self.normalize(&hits);
            for (hit, norm) in hits.into_iter().zip(normalized) {
                let contribution = weight * norm;
                match positions.get(&hit.chunk.id) {
                    Some(&i) => {
                        let existing = &mut merged[i];
                        existing.score += contribution;
                        existing.origin = existing.origin.merge(hit.source.into());
                    }
                    None => {
                        positions.insert(hit.chunk.id.clone(), merged.len());
                        merged.push(Candidate {
                            chunk: hit.chunk,
                            score: contribution,
                            origin: hit.source.into(),
                        });
                    }
                }
            }
        }

        let mut scored: Vec<(f64, Candidate)> = merged.into_iter().map(|c| (c.score, c)).collect();
        sort_descending(&mut scored);
        scored.into_iter().map(|(_, c)| c).collect()
    }

    /// Rescale one list's scores onto a common scale, in list order.
    fn normalize(&self, hits: &[SearchHit]) -> Vec<f64> {
        match self.fusion {
            FusionMethod::ReciprocalRank => (1..=hits.len())
                .map(|rank| 1.0 / (rank as f64 + self.rank_constant))
                .collect(),
            FusionMethod::MinMax => {
                let (min, max) = hits.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), h| {
                    (lo.min(h.score), hi.max(h.score))
                });
                let range = max - min;
                hits.iter()
                    .map(|h| if range > 0.0 { (h.score - min) / range } else { 1.0 })
                    .collect()
            }
        }
    }
}
