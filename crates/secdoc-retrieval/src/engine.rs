//! The hybrid retrieval engine: lifecycle and search.
//!
//! An [`Engine`] owns one active [`IndexPair`] at a time. Builds run
//! exclusively and swap the new pair in only after it has been persisted;
//! searches keep using the previous pair until then.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use secdoc_core::{Chunk, PageDocument, RankedChunk, SecdocConfig, SecdocError};
use tracing::{debug, info, warn};

use crate::chunker::Chunker;
use crate::embedding::Embedder;
use crate::ensemble::EnsembleMerger;
use crate::ingest::load_pages;
use crate::lexical::LexicalIndex;
use crate::rerank::{rerank, RelevanceScorer};
use crate::semantic::SemanticIndex;
use crate::store::{IndexPair, IndexStats, IndexStore};
use crate::tokenize::Tokenizer;

/// Lifecycle state of an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No index has been built or loaded.
    Empty,
    /// A build is running. An earlier pair, if any, still serves searches.
    Building,
    /// An index pair is active.
    Ready,
}

/// Result of a build request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// A new pair was persisted and swapped in.
    Built(IndexStats),
    /// The input held no content; the current state is unchanged.
    SkippedEmpty,
}

/// Hybrid lexical + semantic retrieval with cross-encoder reranking.
///
/// # Examples
///
/// ```no_run
/// use secdoc_core::SecdocConfig;
/// use secdoc_retrieval::embedding::HttpEmbedder;
/// use secdoc_retrieval::engine::Engine;
/// use secdoc_retrieval::rerank::HttpRelevanceScorer;
///
/// # async fn run() -> secdoc_core::Result<()> {
/// let config = SecdocConfig::default();
/// let engine = Engine::new(
///     &config,
///     HttpEmbedder::with_config(&config.embedding)?,
///     HttpRelevanceScorer::with_config(&config.reranker)?,
/// )?;
/// if engine.load() {
///     for chunk in engine.search("firewall rules for the DMZ").await? {
///         println!("{}", chunk.citation());
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Engine<E, S> {
    chunker: Chunker,
    tokenizer: Tokenizer,
    merger: EnsembleMerger,
    embedder: E,
    scorer: S,
    store: IndexStore,
    batch_size: usize,
    rerank_top_n: usize,
    active: RwLock<Option<Arc<IndexPair>>>,
    building: AtomicBool,
}

impl<E, S> std::fmt::Debug for Engine<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.store.root())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Holds the build flag for the lifetime of one build or load.
struct BuildGuard<'a>(&'a AtomicBool);

impl<'a> BuildGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, SecdocError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SecdocError::BuildInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<E: Embedder, S: RelevanceScorer> Engine<E, S> {
    /// Create an engine in the [`EngineState::Empty`] state.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::Config`] if `config` fails validation, or an
    /// I/O error if the configured tokenizer dictionary cannot be read.
    pub fn new(config: &SecdocConfig, embedder: E, scorer: S) -> Result<Self, SecdocError> {
        config.validate()?;
        let tokenizer = match &config.tokenizer.dictionary {
            Some(path) => Tokenizer::with_dictionary(path)?,
            None => Tokenizer::builtin(),
        };
        Ok(Self {
            chunker: Chunker::from_config(&config.chunking)?,
            tokenizer,
            merger: EnsembleMerger::new(&config.retrieval),
            embedder,
            scorer,
            store: IndexStore::new(config.index.root.clone()),
            batch_size: config.embedding.batch_size,
            rerank_top_n: config.retrieval.rerank_top_n,
            active: RwLock::new(None),
            building: AtomicBool::new(false),
        })
    }

    /// Chunk `pages` and build a new index pair from them.
    ///
    /// An empty input (or one whose pages are all blank) is logged and
    /// leaves the engine unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::BuildInProgress`] if another build is running,
    /// [`SecdocError::Scorer`] if embedding fails, and storage errors if the
    /// pair cannot be persisted. On error the previous pair stays active.
    pub async fn build(&self, pages: &[PageDocument]) -> Result<BuildOutcome, SecdocError> {
        if pages.is_empty() {
            warn!("build requested with no pages; keeping the current index");
            return Ok(BuildOutcome::SkippedEmpty);
        }
        let chunks = self.chunker.split(pages);
        info!(pages = pages.len(), chunks = chunks.len(), "chunked pages");
        self.build_chunks(chunks).await
    }

    /// Build a new index pair from already-split chunks.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::build`].
    pub async fn build_chunks(&self, chunks: Vec<Chunk>) -> Result<BuildOutcome, SecdocError> {
        if chunks.is_empty() {
            warn!("build requested with no content; keeping the current index");
            return Ok(BuildOutcome::SkippedEmpty);
        }
        let _guard = BuildGuard::acquire(&self.building)?;
        let started = Instant::now();

        let lexical = LexicalIndex::build(chunks.clone(), self.tokenizer.clone());
        info!(chunks = lexical.len(), "built lexical index");
        let semantic = SemanticIndex::build(chunks, &self.embedder, self.batch_size).await?;
        info!(
            chunks = semantic.len(),
            dimensions = semantic.dimensions(),
            "built semantic index"
        );

        let pair = self.store.persist(lexical, semantic)?;
        let stats = pair.stats();
        *self.active.write() = Some(Arc::new(pair));
        info!(
            generation = %stats.generation,
            chunks = stats.total_chunks,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index pair is active"
        );
        Ok(BuildOutcome::Built(stats))
    }

    /// Load the persisted index pair, logging any failure.
    ///
    /// Returns `true` iff both artifacts were found and loaded. A failed
    /// load leaves the current state untouched.
    pub fn load(&self) -> bool {
        match self.try_load() {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "could not load persisted index; rebuild required");
                false
            }
        }
    }

    /// Load the persisted index pair.
    ///
    /// Returns `Ok(false)` if nothing has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::PartialArtifact`] or
    /// [`SecdocError::Deserialization`] for a damaged generation, and
    /// [`SecdocError::BuildInProgress`] while a build is running.
    pub fn try_load(&self) -> Result<bool, SecdocError> {
        let _guard = BuildGuard::acquire(&self.building)?;
        match self.store.load()? {
            Some(pair) => {
                *self.active.write() = Some(Arc::new(pair));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Load the persisted index, or build one from the page export at
    /// `pages_path` when none exists. Returns whether the engine is ready.
    ///
    /// # Errors
    ///
    /// Returns ingestion errors for `pages_path` and any build error.
    pub async fn init_or_build(&self, pages_path: &Path) -> Result<bool, SecdocError> {
        if self.load() {
            return Ok(true);
        }
        info!(path = %pages_path.display(), "no usable index on disk; building");
        let pages = load_pages(pages_path)?;
        self.build(&pages).await?;
        Ok(self.is_ready())
    }

    /// Top reranked chunks for `query`, at most `rerank_top_n`.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::NotReady`] before any successful build or
    /// load, and [`SecdocError::Scorer`] if embedding or reranking fails.
    pub async fn search(&self, query: &str) -> Result<Vec<Chunk>, SecdocError> {
        Ok(self
            .search_with_scores(query)
            .await?
            .into_iter()
            .map(|ranked| ranked.chunk)
            .collect())
    }

    /// Like [`Engine::search`], keeping the reranker's scores.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::search`].
    pub async fn search_with_scores(&self, query: &str) -> Result<Vec<RankedChunk>, SecdocError> {
        let pair = self.active.read().clone().ok_or(SecdocError::NotReady)?;
        let candidates = self
            .merger
            .search(pair.lexical(), pair.semantic(), &self.embedder, query)
            .await?;
        let merged = candidates.len();
        let ranked = rerank(&self.scorer, query, candidates, self.rerank_top_n).await?;
        debug!(
            query,
            generation = pair.generation(),
            candidates = merged,
            results = ranked.len(),
            "search complete"
        );
        Ok(ranked)
    }
}

impl<E, S> Engine<E, S> {
    /// Whether an index pair is active.
    pub fn is_ready(&self) -> bool {
        self.active.read().is_some()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        if self.building.load(Ordering::Acquire) {
            EngineState::Building
        } else if self.is_ready() {
            EngineState::Ready
        } else {
            EngineState::Empty
        }
    }

    /// Statistics for the active pair, if any.
    pub fn stats(&self) -> Option<IndexStats> {
        self.active.read().as_ref().map(|pair| pair.stats())
    }

    /// The store that owns the index root.
    pub fn store(&self) -> &IndexStore {
        &self.store
    }
}
