use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SecdocError;

/// Top-level configuration loaded from `.secdoc.toml`.
///
/// Resolution order: environment variables > config file > defaults.
///
/// # Examples
///
/// ```
/// use secdoc_core::SecdocConfig;
///
/// let config = SecdocConfig::default();
/// assert_eq!(config.chunking.chunk_size, 1100);
/// assert_eq!(config.retrieval.rerank_top_n, 5);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecdocConfig {
    /// Where the index generations live.
    #[serde(default)]
    pub index: IndexConfig,
    /// Page splitting parameters.
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Ensemble and rerank parameters.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Embedding endpoint settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Cross-encoder endpoint settings.
    #[serde(default)]
    pub reranker: RerankerConfig,
    /// Lexical tokenizer settings.
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
}

impl SecdocConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::FileNotFound`] if `path` does not exist,
    /// [`SecdocError::Io`] if it cannot be read, or [`SecdocError::Toml`] if
    /// the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use secdoc_core::SecdocConfig;
    /// use std::path::Path;
    ///
    /// let config = SecdocConfig::from_file(Path::new(".secdoc.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, SecdocError> {
        if !path.exists() {
            return Err(SecdocError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use secdoc_core::SecdocConfig;
    ///
    /// let toml = r#"
    /// [chunking]
    /// chunk_size = 800
    /// "#;
    /// let config = SecdocConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.chunking.chunk_size, 800);
    /// assert_eq!(config.chunking.overlap, 200);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, SecdocError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::Config`] if a numeric variable does not parse.
    pub fn apply_env(&mut self) -> Result<(), SecdocError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` as the environment.
    ///
    /// Recognized variables: `DATABASE_PATH`, `CHUNK_SIZE`, `CHUNK_OVERLAP`,
    /// `RETRIEVAL_K`, `RERANK_TOP_N`, `EMBEDDING_MODEL_NAME`,
    /// `RERANKER_MODEL_NAME`, `EMBEDDING_BATCH_SIZE`.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::Config`] if a numeric variable does not parse.
    ///
    /// # Examples
    ///
    /// ```
    /// use secdoc_core::SecdocConfig;
    ///
    /// let mut config = SecdocConfig::default();
    /// config
    ///     .apply_env_with(|key| (key == "RETRIEVAL_K").then(|| "25".to_string()))
    ///     .unwrap();
    /// assert_eq!(config.retrieval.retrieval_k, 25);
    /// ```
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), SecdocError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("DATABASE_PATH") {
            self.index.root = PathBuf::from(path);
        }
        if let Some(v) = lookup("CHUNK_SIZE") {
            self.chunking.chunk_size = parse_env("CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("CHUNK_OVERLAP") {
            self.chunking.overlap = parse_env("CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = lookup("RETRIEVAL_K") {
            self.retrieval.retrieval_k = parse_env("RETRIEVAL_K", &v)?;
        }
        if let Some(v) = lookup("RERANK_TOP_N") {
            self.retrieval.rerank_top_n = parse_env("RERANK_TOP_N", &v)?;
        }
        if let Some(v) = lookup("EMBEDDING_BATCH_SIZE") {
            self.embedding.batch_size = parse_env("EMBEDDING_BATCH_SIZE", &v)?;
        }
        if let Some(model) = lookup("EMBEDDING_MODEL_NAME") {
            self.embedding.model = model;
        }
        if let Some(model) = lookup("RERANKER_MODEL_NAME") {
            self.reranker.model = model;
        }
        Ok(())
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::Config`] describing the first violated constraint.
    ///
    /// # Examples
    ///
    /// ```
    /// use secdoc_core::SecdocConfig;
    ///
    /// let mut config = SecdocConfig::default();
    /// assert!(config.validate().is_ok());
    /// config.chunking.overlap = config.chunking.chunk_size;
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), SecdocError> {
        let chunking = &self.chunking;
        if chunking.chunk_size == 0 {
            return Err(SecdocError::Config("chunking.chunk_size must be positive".into()));
        }
        if chunking.overlap >= chunking.chunk_size {
            return Err(SecdocError::Config(format!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                chunking.overlap, chunking.chunk_size
            )));
        }

        let retrieval = &self.retrieval;
        if retrieval.retrieval_k == 0 || retrieval.rerank_top_n == 0 {
            return Err(SecdocError::Config(
                "retrieval.retrieval_k and retrieval.rerank_top_n must be positive".into(),
            ));
        }
        let weights = [retrieval.lexical_weight, retrieval.semantic_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SecdocError::Config(
                "retrieval weights must be finite and non-negative".into(),
            ));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(SecdocError::Config(
                "at least one retrieval weight must be positive".into(),
            ));
        }

        if self.embedding.batch_size == 0 {
            return Err(SecdocError::Config("embedding.batch_size must be positive".into()));
        }
        Ok(())
    }
}

fn parse_env(key: &str, value: &str) -> Result<usize, SecdocError> {
    value
        .trim()
        .parse()
        .map_err(|_| SecdocError::Config(format!("{key} must be a positive integer, got '{value}'")))
}

/// Index storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Root directory owned exclusively by the index store (default: `database`).
    #[serde(default = "default_index_root")]
    pub root: PathBuf,
}

fn default_index_root() -> PathBuf {
    PathBuf::from("database")
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: default_index_root(),
        }
    }
}

/// Page splitting configuration, in characters.
///
/// # Examples
///
/// ```
/// use secdoc_core::ChunkingConfig;
///
/// let config = ChunkingConfig::default();
/// assert_eq!((config.chunk_size, config.overlap), (1100, 200));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum chunk length (default: 1100).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks of a page (default: 200).
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

fn default_chunk_size() -> usize {
    1100
}

fn default_overlap() -> usize {
    200
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

/// How the ensemble rescales each retriever's scores before weighting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    /// `1 / (rank_constant + rank)` per list.
    #[default]
    ReciprocalRank,
    /// `(score - min) / (max - min)` per list.
    MinMax,
}

/// Ensemble and rerank configuration.
///
/// # Examples
///
/// ```
/// use secdoc_core::{FusionMethod, RetrievalConfig};
///
/// let config = RetrievalConfig::default();
/// assert_eq!(config.retrieval_k, 15);
/// assert_eq!(config.lexical_weight, 0.4);
/// assert_eq!(config.semantic_weight, 0.6);
/// assert_eq!(config.fusion, FusionMethod::ReciprocalRank);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results requested from each index (default: 15).
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,
    /// Results kept after reranking (default: 5).
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,
    /// Weight of the lexical side (default: 0.4).
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    /// Weight of the semantic side (default: 0.6).
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    /// Score normalization before weighting.
    #[serde(default)]
    pub fusion: FusionMethod,
    /// Rank offset for reciprocal-rank fusion (default: 60).
    #[serde(default = "default_rank_constant")]
    pub rank_constant: usize,
}

fn default_retrieval_k() -> usize {
    15
}

fn default_rerank_top_n() -> usize {
    5
}

fn default_lexical_weight() -> f64 {
    0.4
}

fn default_semantic_weight() -> f64 {
    0.6
}

fn default_rank_constant() -> usize {
    60
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            retrieval_k: default_retrieval_k(),
            rerank_top_n: default_rerank_top_n(),
            lexical_weight: default_lexical_weight(),
            semantic_weight: default_semantic_weight(),
            fusion: FusionMethod::default(),
            rank_constant: default_rank_constant(),
        }
    }
}

/// Embedding endpoint configuration.
///
/// # Examples
///
/// ```
/// use secdoc_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.model, "intfloat/multilingual-e5-small");
/// assert_eq!(config.batch_size, 32);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible `/embeddings` endpoint.
    #[serde(default = "default_embedding_url")]
    pub base_url: String,
    /// Model name (default: `"intfloat/multilingual-e5-small"`).
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Bearer token, if the endpoint requires one.
    pub api_key: Option<String>,
    /// Texts per embedding request (default: 32).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Per-request timeout in seconds (default: 120).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_url() -> String {
    "http://localhost:8080/v1".into()
}

fn default_embedding_model() -> String {
    "intfloat/multilingual-e5-small".into()
}

fn default_batch_size() -> usize {
    32
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_url(),
            model: default_embedding_model(),
            api_key: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Cross-encoder endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Base URL of a `/rerank` endpoint.
    #[serde(default = "default_reranker_url")]
    pub base_url: String,
    /// Model name (default: `"BAAI/bge-reranker-base"`).
    #[serde(default = "default_reranker_model")]
    pub model: String,
    /// Bearer token, if the endpoint requires one.
    pub api_key: Option<String>,
    /// Per-request timeout in seconds (default: 120).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_reranker_url() -> String {
    "http://localhost:8081".into()
}

fn default_reranker_model() -> String {
    "BAAI/bge-reranker-base".into()
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            base_url: default_reranker_url(),
            model: default_reranker_model(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Lexical tokenizer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// Extra Thai words, one per line, merged into the built-in dictionary.
    pub dictionary: Option<PathBuf>,
}
