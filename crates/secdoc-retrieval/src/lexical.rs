//! BM25 keyword index.
//!
//! Each chunk is tokenized once at build time with the index's own
//! [`Tokenizer`]; queries go through the same tokenizer. Documents that share
//! no term with the query are not returned.

use std::collections::{BTreeMap, HashMap};

use secdoc_core::Chunk;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::hit::{sort_descending, SearchHit, SearchSource};
use crate::tokenize::Tokenizer;

const K1: f64 = 1.5;
const B: f64 = 0.75;

/// One indexed chunk with its term counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LexicalDocument {
    /// The indexed chunk.
    pub chunk: Chunk,
    /// Term frequencies.
    pub terms: BTreeMap<String, u32>,
    /// Total number of terms.
    pub length: usize,
}

/// Serializable form of a [`LexicalIndex`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LexicalSnapshot {
    /// Tokenizer dictionary the documents were segmented with.
    pub dictionary: Vec<String>,
    /// Documents in insertion order.
    pub documents: Vec<LexicalDocument>,
}

/// BM25 index over chunk content.
///
/// # Examples
///
/// ```
/// use secdoc_core::{Chunk, Language};
/// use secdoc_retrieval::lexical::LexicalIndex;
/// use secdoc_retrieval::tokenize::Tokenizer;
///
/// let chunk = |id: &str, content: &str| Chunk {
///     id: id.into(),
///     content: content.into(),
///     source: "cis.pdf".into(),
///     logical_page: "1".into(),
///     language: Language::English,
/// };
/// let index = LexicalIndex::build(
///     vec![chunk("a", "disable telnet"), chunk("b", "enable ssh")],
///     Tokenizer::builtin(),
/// );
/// let hits = index.query("ssh", 5);
/// assert_eq!(hits.len(), 1);
/// assert_eq!(hits[0].chunk.id, "b");
/// ```
#[derive(Debug, Clone)]
pub struct LexicalIndex {
    tokenizer: Tokenizer,
    documents: Vec<LexicalDocument>,
    idf: HashMap<String, f64>,
    avg_len: f64,
}

impl LexicalIndex {
    /// Tokenize and index `chunks`, keeping their order.
    pub fn build(chunks: Vec<Chunk>, tokenizer: Tokenizer) -> Self {
        let documents = chunks
            .into_iter()
            .map(|chunk| {
                let tokens = tokenizer.tokenize(&chunk.content, Some(chunk.language));
                let mut terms = BTreeMap::new();
                for token in &tokens {
                    *terms.entry(token.clone()).or_insert(0) += 1;
                }
                LexicalDocument {
                    chunk,
                    terms,
                    length: tokens.len(),
                }
            })
            .collect();
        let index = Self::assemble(tokenizer, documents);
        debug!(
            documents = index.documents.len(),
            vocabulary = index.idf.len(),
            "built lexical index"
        );
        index
    }

    /// Rebuild an index from its persisted form.
    pub fn from_snapshot(snapshot: LexicalSnapshot) -> Self {
        let tokenizer = Tokenizer::from_words(&snapshot.dictionary);
        Self::assemble(tokenizer, snapshot.documents)
    }

    /// Persistable form of this index.
    pub fn snapshot(&self) -> LexicalSnapshot {
        LexicalSnapshot {
            dictionary: self.tokenizer.words(),
            documents: self.documents.clone(),
        }
    }

    fn assemble(tokenizer: Tokenizer, documents: Vec<LexicalDocument>) -> Self {
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for doc in &documents {
            for term in doc.terms.keys() {
                *doc_freq.entry(term.as_str()).or_default() += 1;
            }
        }

        let n = documents.len() as f64;
        let idf = doc_freq
            .into_iter()
            .map(|(term, df)| {
                let df = df as f64;
                (term.to_string(), (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
            })
            .collect();

        let total_len: usize = documents.iter().map(|d| d.length).sum();
        let avg_len = if documents.is_empty() {
            0.0
        } else {
            total_len as f64 / n
        };

        Self {
            tokenizer,
            documents,
            idf,
            avg_len,
        }
    }

    /// Top `k` chunks for `text`, highest score first; ties keep insertion order.
    pub fn query(&self, text: &str, k: usize) -> Vec<SearchHit> {
        let query_terms = self.tokenizer.tokenize(text, None);
        if query_terms.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(f64, &LexicalDocument)> = self
            .documents
            .iter()
            .filter_map(|doc| {
                let score = self.score(doc, &query_terms);
                (score > 0.0).then_some((score, doc))
            })
            .collect();
        sort_descending(&mut scored);
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(score, doc)| SearchHit {
                chunk: doc.chunk.clone(),
                score,
                source: SearchSource::Lexical,
            })
            .collect()
    }

    fn score(&self, doc: &LexicalDocument, query_terms: &[String]) -> f64 {
        let len_norm = if self.avg_len > 0.0 {
            doc.length as f64 / self.avg_len
        } else {
            0.0
        };
        query_terms
            .iter()
            .filter_map(|term| {
                let tf = f64::from(*doc.terms.get(term)?);
                let idf = self.idf.get(term).copied().unwrap_or(0.0);
                Some(idf * tf * (K1 + 1.0) / (tf + K1 * (1.0 - B + B * len_norm)))
            })
            .sum()
    }

    /// Indexed chunks in insertion order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.documents.iter().map(|d| &d.chunk)
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// The tokenizer shared by build and query.
    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secdoc_core::Language;

    fn chunk(id: &str, content: &str, language: Language) -> Chunk {
        Chunk {
            id: id.into(),
            content: content.into(),
            source: "test.pdf".into(),
            logical_page: "1".into(),
            language,
        }
    }

    fn english(id: &str, content: &str) -> Chunk {
        chunk(id, content, Language::English)
    }

    #[test]
    fn rare_terms_outrank_common_ones() {
        let index = LexicalIndex::build(
            vec![
                english("a", "policy policy policy"),
                english("b", "policy owasp"),
                english("c", "policy review"),
            ],
            Tokenizer::builtin(),
        );
        let hits = index.query("policy owasp", 3);
        assert_eq!(hits[0].chunk.id, "b");
        assert!(hits.iter().all(|h| h.source == SearchSource::Lexical));
    }

    #[test]
    fn non_matching_documents_are_omitted() {
        let index = LexicalIndex::build(
            vec![english("a", "firewall dmz"), english("b", "password length")],
            Tokenizer::builtin(),
        );
        let hits = index.query("firewall", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "a");
    }

    #[test]
    fn k_caps_results_and_ties_keep_insertion_order() {
        let index = LexicalIndex::build(
            vec![
                english("first", "logging"),
                english("second", "logging"),
                english("third", "logging"),
            ],
            Tokenizer::builtin(),
        );
        let hits = index.query("logging", 2);
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn thai_query_matches_segmented_corpus() {
        let index = LexicalIndex::build(
            vec![
                chunk("th", "ผู้ใช้งานต้องตั้งรหัสผ่านที่ซับซ้อน", Language::Thai),
                chunk("en", "Passwords must be complex", Language::English),
            ],
            Tokenizer::builtin(),
        );
        let hits = index.query("รหัสผ่าน", 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "th");
    }

    #[test]
    fn query_is_case_insensitive() {
        let index = LexicalIndex::build(vec![english("a", "Enable MFA")], Tokenizer::builtin());
        assert_eq!(index.query("mfa", 5).len(), 1);
    }

    #[test]
    fn empty_index_and_empty_query() {
        let empty = LexicalIndex::build(Vec::new(), Tokenizer::builtin());
        assert!(empty.query("anything", 5).is_empty());

        let index = LexicalIndex::build(vec![english("a", "text")], Tokenizer::builtin());
        assert!(index.query("  ,. ", 5).is_empty());
        assert!(index.query("text", 0).is_empty());
    }

    #[test]
    fn snapshot_preserves_scores() {
        let index = LexicalIndex::build(
            vec![
                english("a", "incident response plan"),
                english("b", "incident reporting within 72 hours"),
                english("c", "backup restore"),
            ],
            Tokenizer::from_words(["ระบบ"]),
        );
        let json = serde_json::to_string(&index.snapshot()).unwrap();
        let restored = LexicalIndex::from_snapshot(serde_json::from_str(&json).unwrap());

        assert_eq!(restored.tokenizer(), index.tokenizer());
        assert_eq!(
            restored.query("incident reporting", 3),
            index.query("incident reporting", 3)
        );
    }
}
