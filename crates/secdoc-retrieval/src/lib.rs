//! Hybrid lexical + semantic retrieval over bilingual security standards.
//!
//! Pages are split into overlapping chunks, indexed twice (BM25 over
//! dictionary-segmented Thai/English terms, and dense embeddings), fused with
//! weighted reciprocal-rank or min-max scaling, and reranked by a pairwise
//! relevance model. Both indexes are persisted together as one generation.

pub mod chunker;
pub mod embedding;
pub mod engine;
pub mod ensemble;
pub mod hit;
pub mod ingest;
pub mod lexical;
pub mod rerank;
pub mod semantic;
pub mod store;
pub mod tokenize;

pub use embedding::{Embedder, HttpEmbedder};
pub use engine::{BuildOutcome, Engine, EngineState};
pub use rerank::{HttpRelevanceScorer, RelevanceScorer};
pub use store::{IndexStats, IndexStore};
