//! Core types, configuration, and error handling for secdoc.
//!
//! This crate provides the shared foundation used by the retrieval engine
//! and the command-line front end:
//! - [`SecdocError`] — unified error type using `thiserror`
//! - [`SecdocConfig`] — configuration loaded from `.secdoc.toml`
//! - Data model: [`PageDocument`], [`Chunk`], [`Candidate`], [`RankedChunk`]

mod config;
mod error;
mod types;

pub use config::{
    ChunkingConfig, EmbeddingConfig, FusionMethod, IndexConfig, RerankerConfig, RetrievalConfig,
    SecdocConfig, TokenizerConfig,
};
pub use error::{ScorerStage, SecdocError};
pub use types::{Candidate, Chunk, Language, Origin, OutputFormat, PageDocument, RankedChunk};

/// A convenience `Result` type for secdoc operations.
pub type Result<T> = std::result::Result<T, SecdocError>;
