use std::fmt;
use std::path::PathBuf;

/// Which model-backed stage a scorer failure came from.
///
/// # Examples
///
/// ```
/// use secdoc_core::ScorerStage;
///
/// assert_eq!(ScorerStage::Reranking.to_string(), "reranking");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScorerStage {
    /// Embedding chunk content while building the semantic index.
    EmbeddingBuild,
    /// Embedding the query text at search time.
    EmbeddingQuery,
    /// Pairwise relevance scoring of merged candidates.
    Reranking,
}

impl fmt::Display for ScorerStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScorerStage::EmbeddingBuild => write!(f, "embedding (build)"),
            ScorerStage::EmbeddingQuery => write!(f, "embedding (query)"),
            ScorerStage::Reranking => write!(f, "reranking"),
        }
    }
}

/// Errors that can occur across secdoc.
///
/// Library crates use this type directly; the binary converts to
/// `miette` diagnostics at the boundary.
///
/// # Examples
///
/// ```
/// use secdoc_core::SecdocError;
///
/// let err = SecdocError::Config("missing embedding endpoint".into());
/// assert!(err.to_string().contains("missing embedding endpoint"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum SecdocError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Search was requested before any index was built or loaded.
    #[error("retrieval engine is not ready: build or load an index first")]
    #[diagnostic(help("run `secdoc build --input <pages.json>` to create an index"))]
    NotReady,

    /// A build or load was requested while another build holds the index paths.
    #[error("an index build is already in progress")]
    BuildInProgress,

    /// Only one of the two persisted index artifacts exists.
    #[error("partial index on disk: found {}, missing {}", .present.display(), .missing.display())]
    #[diagnostic(help("rebuild the index; partial generations are never loaded"))]
    PartialArtifact {
        /// The artifact that was found.
        present: PathBuf,
        /// The artifact that was expected but absent.
        missing: PathBuf,
    },

    /// A persisted artifact exists but could not be read back.
    #[error("failed to load {artifact}: {message}")]
    Deserialization {
        /// Artifact name (`"lexical"`, `"semantic"`, `"manifest"`).
        artifact: &'static str,
        /// What went wrong.
        message: String,
    },

    /// The embedding function or the relevance scorer failed.
    #[error("{stage} failed: {message}")]
    Scorer {
        /// Stage in which the scorer was invoked.
        stage: ScorerStage,
        /// What went wrong.
        message: String,
    },

    /// SQLite failure while persisting or reading the semantic artifact.
    #[error("database error: {0}")]
    Database(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

impl SecdocError {
    /// Shorthand for a [`SecdocError::Scorer`].
    pub fn scorer(stage: ScorerStage, message: impl Into<String>) -> Self {
        SecdocError::Scorer {
            stage,
            message: message.into(),
        }
    }

    /// Re-tag an error raised by a scoring function with the stage that called it.
    ///
    /// # Examples
    ///
    /// ```
    /// use secdoc_core::{ScorerStage, SecdocError};
    ///
    /// let err = SecdocError::scorer(ScorerStage::EmbeddingBuild, "timeout")
    ///     .in_stage(ScorerStage::EmbeddingQuery);
    /// assert_eq!(err.to_string(), "embedding (query) failed: timeout");
    /// ```
    pub fn in_stage(self, stage: ScorerStage) -> Self {
        match self {
            SecdocError::Scorer { message, .. } => SecdocError::Scorer { stage, message },
            other => SecdocError::scorer(stage, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SecdocError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn config_error_displays_message() {
        let err = SecdocError::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn partial_artifact_names_both_paths() {
        let err = SecdocError::PartialArtifact {
            present: PathBuf::from("/db/gen-1/lexical.json"),
            missing: PathBuf::from("/db/gen-1/semantic.db"),
        };
        let msg = err.to_string();
        assert!(msg.contains("lexical.json"));
        assert!(msg.contains("semantic.db"));
    }

    #[test]
    fn scorer_error_names_stage() {
        let err = SecdocError::scorer(ScorerStage::EmbeddingBuild, "HTTP 503");
        assert_eq!(err.to_string(), "embedding (build) failed: HTTP 503");
    }
}
