use secdoc_core::{Chunk, Origin};

/// A hit from a single index.
///
/// Scores are only comparable with other hits from the same index and query.
///
/// # Examples
///
/// ```
/// use secdoc_core::{Chunk, Language};
/// use secdoc_retrieval::hit::{SearchHit, SearchSource};
///
/// let hit = SearchHit {
///     chunk: Chunk {
///         id: "a1".into(),
///         content: "Enforce MFA for remote access".into(),
///         source: "nist-800-63b.pdf".into(),
///         logical_page: "14".into(),
///         language: Language::English,
///     },
///     score: 3.2,
///     source: SearchSource::Lexical,
/// };
/// assert!(hit.score > 3.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// The matched chunk.
    pub chunk: Chunk,
    /// Index-specific relevance score.
    pub score: f64,
    /// Which index produced the hit.
    pub source: SearchSource,
}

/// Index that produced a [`SearchHit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSource {
    /// BM25 keyword index.
    Lexical,
    /// Embedding similarity index.
    Semantic,
}

impl From<SearchSource> for Origin {
    fn from(source: SearchSource) -> Self {
        match source {
            SearchSource::Lexical => Origin::Lexical,
            SearchSource::Semantic => Origin::Semantic,
        }
    }
}

/// Sort `(score, item)` pairs by descending score, keeping input order on ties.
pub(crate) fn sort_descending<T>(scored: &mut [(f64, T)]) {
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
}
