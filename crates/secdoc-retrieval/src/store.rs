//! Durable storage for index generations.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/CURRENT                    name of the active generation
//! <root>/gen-<millis>-<fp>/lexical.json
//! <root>/gen-<millis>-<fp>/semantic.db
//! ```
//!
//! A generation is written in full and read back before `CURRENT` is
//! switched to it, so a crash mid-build never leaves `CURRENT` pointing at a
//! half-written pair.

use std::collections::HashSet;
use std::fs;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags};
use secdoc_core::{Chunk, Language, SecdocError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::lexical::{LexicalIndex, LexicalSnapshot};
use crate::semantic::SemanticIndex;

/// On-disk format version written into both artifacts.
pub const FORMAT_VERSION: u32 = 1;

const CURRENT_FILE: &str = "CURRENT";
const LEXICAL_FILE: &str = "lexical.json";
const SEMANTIC_FILE: &str = "semantic.db";
const GENERATION_PREFIX: &str = "gen-";

/// The lexical and semantic indexes of one build, bound together.
///
/// Both indexes always hold the same chunks in the same order.
#[derive(Debug)]
pub struct IndexPair {
    generation: String,
    fingerprint: String,
    lexical: LexicalIndex,
    semantic: SemanticIndex,
}

impl IndexPair {
    fn new(
        generation: String,
        lexical: LexicalIndex,
        semantic: SemanticIndex,
    ) -> Result<Self, SecdocError> {
        let lexical_ids = lexical.chunks().map(|c| c.id.as_str());
        let semantic_ids = semantic.chunks().iter().map(|c| c.id.as_str());
        if lexical.len() != semantic.len() || !lexical_ids.eq(semantic_ids) {
            return Err(SecdocError::Deserialization {
                artifact: "index pair",
                message: format!(
                    "lexical and semantic indexes hold different chunks ({} vs {})",
                    lexical.len(),
                    semantic.len()
                ),
            });
        }
        let fingerprint = fingerprint(semantic.chunks());
        Ok(Self {
            generation,
            fingerprint,
            lexical,
            semantic,
        })
    }

    /// Generation directory name this pair was persisted as.
    pub fn generation(&self) -> &str {
        &self.generation
    }

    /// SHA-256 over the chunk ids, shared by both artifacts.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The BM25 side.
    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    /// The embedding side.
    pub fn semantic(&self) -> &SemanticIndex {
        &self.semantic
    }

    /// Summary numbers for status reporting.
    pub fn stats(&self) -> IndexStats {
        let sources: HashSet<&str> = self
            .semantic
            .chunks()
            .iter()
            .map(|c| c.source.as_str())
            .collect();
        IndexStats {
            generation: self.generation.clone(),
            total_chunks: self.semantic.len(),
            total_sources: sources.len(),
            dimensions: self.semantic.dimensions(),
        }
    }
}

/// Index statistics.
///
/// # Examples
///
/// ```
/// use secdoc_retrieval::store::IndexStats;
///
/// let stats = IndexStats {
///     generation: "gen-1700000000000-3f2a9c01".into(),
///     total_chunks: 120,
///     total_sources: 4,
///     dimensions: 384,
/// };
/// let json = serde_json::to_value(&stats).unwrap();
/// assert_eq!(json["totalChunks"], 120);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    /// Active generation directory name.
    pub generation: String,
    /// Number of indexed chunks.
    pub total_chunks: usize,
    /// Number of distinct source documents.
    pub total_sources: usize,
    /// Embedding dimensionality.
    pub dimensions: usize,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LexicalArtifact {
    format_version: u32,
    fingerprint: String,
    chunk_count: usize,
    index: LexicalSnapshot,
}

/// Owner of the index root directory.
///
/// # Examples
///
/// ```
/// use secdoc_retrieval::store::IndexStore;
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = IndexStore::new(dir.path().join("database"));
/// assert!(store.load().unwrap().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    /// Create a store rooted at `root`. Nothing is touched until a persist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Name of the generation `CURRENT` points at, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::Io`] if `CURRENT` exists but cannot be read, or
    /// [`SecdocError::Deserialization`] if it does not name a generation.
    pub fn current_generation(&self) -> Result<Option<String>, SecdocError> {
        let content = match fs::read_to_string(self.root.join(CURRENT_FILE)) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let name = content.trim();
        if !name.starts_with(GENERATION_PREFIX) || name.contains(['/', '\\']) {
            return Err(SecdocError::Deserialization {
                artifact: "manifest",
                message: format!("CURRENT does not name a generation: '{name}'"),
            });
        }
        Ok(Some(name.to_string()))
    }

    /// Write both indexes as a new generation and make it current.
    ///
    /// The previous generation stays current until the new one has been
    /// written and read back successfully. Older generations are pruned
    /// afterwards; pruning failures are only logged.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::Io`] or [`SecdocError::Database`] if writing
    /// fails, or [`SecdocError::Deserialization`] if the indexes disagree or
    /// the written generation does not read back.
    pub fn persist(
        &self,
        lexical: LexicalIndex,
        semantic: SemanticIndex,
    ) -> Result<IndexPair, SecdocError> {
        let mut pair = IndexPair::new(String::new(), lexical, semantic)?;
        fs::create_dir_all(&self.root)?;
        let (generation, dir) = self.fresh_generation_dir(&pair.fingerprint)?;
        pair.generation = generation;

        if let Err(e) = self.write_generation(&dir, &pair) {
            discard(&dir);
            return Err(e);
        }
        match read_generation(&dir) {
            Ok((lexical, semantic))
                if lexical.len() == pair.lexical.len()
                    && fingerprint_of(&semantic) == pair.fingerprint => {}
            Ok(_) => {
                discard(&dir);
                return Err(SecdocError::Deserialization {
                    artifact: "index pair",
                    message: format!("generation {} did not read back intact", pair.generation),
                });
            }
            Err(e) => {
                discard(&dir);
                return Err(e);
            }
        }

        self.switch_current(&pair.generation)?;
        info!(
            generation = %pair.generation,
            chunks = pair.semantic.len(),
            "persisted index generation"
        );
        self.prune(&pair.generation);
        Ok(pair)
    }

    /// Load the current generation.
    ///
    /// Returns `Ok(None)` when no index has been persisted yet, or when the
    /// current generation directory holds neither artifact.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::PartialArtifact`] if exactly one artifact
    /// exists, and [`SecdocError::Deserialization`] if an artifact is corrupt
    /// or the two disagree.
    pub fn load(&self) -> Result<Option<IndexPair>, SecdocError> {
        let Some(generation) = self.current_generation()? else {
            debug!(root = %self.root.display(), "no current index generation");
            return Ok(None);
        };
        let dir = self.root.join(&generation);
        let lexical_path = dir.join(LEXICAL_FILE);
        let semantic_path = dir.join(SEMANTIC_FILE);

        match (lexical_path.is_file(), semantic_path.is_file()) {
            (true, true) => {}
            (false, false) => {
                warn!(generation = %generation, "current generation has no artifacts");
                return Ok(None);
            }
            (true, false) => {
                return Err(SecdocError::PartialArtifact {
                    present: lexical_path,
                    missing: semantic_path,
                });
            }
            (false, true) => {
                return Err(SecdocError::PartialArtifact {
                    present: semantic_path,
                    missing: lexical_path,
                });
            }
        }

        let (lexical, semantic) = read_generation(&dir)?;
        let pair = IndexPair::new(generation, lexical, semantic)?;
        info!(
            generation = %pair.generation,
            chunks = pair.semantic.len(),
            "loaded index generation"
        );
        Ok(Some(pair))
    }

    fn fresh_generation_dir(&self, fingerprint: &str) -> Result<(String, PathBuf), SecdocError> {
        let base = format!(
            "{GENERATION_PREFIX}{}-{}",
            chrono::Utc::now().timestamp_millis(),
            &fingerprint[..8]
        );
        let mut name = base.clone();
        let mut attempt = 1;
        loop {
            let dir = self.root.join(&name);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok((name, dir)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    name = format!("{base}-{attempt}");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write_generation(&self, dir: &Path, pair: &IndexPair) -> Result<(), SecdocError> {
        let artifact = LexicalArtifact {
            format_version: FORMAT_VERSION,
            fingerprint: pair.fingerprint.clone(),
            chunk_count: pair.lexical.len(),
            index: pair.lexical.snapshot(),
        };
        let file = fs::File::create(dir.join(LEXICAL_FILE))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &artifact)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        write_semantic(&dir.join(SEMANTIC_FILE), pair)?;
        debug!(dir = %dir.display(), "wrote generation artifacts");
        Ok(())
    }

    fn switch_current(&self, generation: &str) -> Result<(), SecdocError> {
        let tmp = self.root.join(format!("{CURRENT_FILE}.tmp"));
        let mut file = fs::File::create(&tmp)?;
        file.write_all(generation.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, self.root.join(CURRENT_FILE))?;
        Ok(())
    }

    fn prune(&self, keep: &str) {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "could not list index root for pruning");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(GENERATION_PREFIX) || name == keep {
                continue;
            }
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => debug!(generation = %name, "pruned old generation"),
                Err(e) => warn!(generation = %name, error = %e, "failed to prune old generation"),
            }
        }
    }
}

fn discard(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "failed to remove unfinished generation");
    }
}

fn fingerprint(chunks: &[Chunk]) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk.id.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

fn fingerprint_of(semantic: &SemanticIndex) -> String {
    fingerprint(semantic.chunks())
}

fn write_semantic(path: &Path, pair: &IndexPair) -> Result<(), SecdocError> {
    let db = |e: rusqlite::Error| SecdocError::Database(format!("failed to write semantic index: {e}"));
    let mut conn = Connection::open(path).map_err(db)?;
    conn.execute_batch(
        "
        CREATE TABLE metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE chunks (
            ordinal INTEGER PRIMARY KEY,
            id TEXT NOT NULL UNIQUE,
            source TEXT NOT NULL,
            logical_page TEXT NOT NULL,
            language TEXT NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL
        );
        ",
    )
    .map_err(db)?;

    let tx = conn.transaction().map_err(db)?;
    {
        let mut meta = tx
            .prepare("INSERT INTO metadata (key, value) VALUES (?1, ?2)")
            .map_err(db)?;
        let semantic = &pair.semantic;
        for (key, value) in [
            ("format_version", FORMAT_VERSION.to_string()),
            ("fingerprint", pair.fingerprint.clone()),
            ("chunk_count", semantic.len().to_string()),
            ("dimensions", semantic.dimensions().to_string()),
            ("generation", pair.generation.clone()),
        ] {
            meta.execute(params![key, value]).map_err(db)?;
        }

        let mut insert = tx
            .prepare(
                "INSERT INTO chunks (ordinal, id, source, logical_page, language, content, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .map_err(db)?;
        for (ordinal, (chunk, vector)) in semantic.chunks().iter().zip(semantic.vectors()).enumerate() {
            insert
                .execute(params![
                    ordinal as i64,
                    chunk.id,
                    chunk.source,
                    chunk.logical_page,
                    chunk.language.as_str(),
                    chunk.content,
                    floats_to_bytes(vector),
                ])
                .map_err(db)?;
        }
    }
    tx.commit().map_err(db)
}

fn read_generation(dir: &Path) -> Result<(LexicalIndex, SemanticIndex), SecdocError> {
    let lexical = read_lexical(&dir.join(LEXICAL_FILE))?;
    let (fingerprint, semantic) = read_semantic(&dir.join(SEMANTIC_FILE))?;

    if lexical.fingerprint != fingerprint {
        return Err(SecdocError::Deserialization {
            artifact: "index pair",
            message: "lexical and semantic artifacts come from different builds".into(),
        });
    }
    if fingerprint_of(&semantic) != fingerprint {
        return Err(SecdocError::Deserialization {
            artifact: "semantic",
            message: "stored chunks do not match the recorded fingerprint".into(),
        });
    }
    Ok((LexicalIndex::from_snapshot(lexical.index), semantic))
}

fn read_lexical(path: &Path) -> Result<LexicalArtifact, SecdocError> {
    let corrupt = |message: String| SecdocError::Deserialization {
        artifact: "lexical",
        message,
    };
    let file = fs::File::open(path)?;
    let artifact: LexicalArtifact = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| corrupt(format!("{}: {e}", path.display())))?;
    if artifact.format_version != FORMAT_VERSION {
        return Err(corrupt(format!(
            "unsupported format version {}",
            artifact.format_version
        )));
    }
    if artifact.chunk_count != artifact.index.documents.len() {
        return Err(corrupt(format!(
            "header says {} chunks, found {}",
            artifact.chunk_count,
            artifact.index.documents.len()
        )));
    }
    Ok(artifact)
}

/// Returns the recorded fingerprint and the restored index.
fn read_semantic(path: &Path) -> Result<(String, SemanticIndex), SecdocError> {
    let corrupt = |message: String| SecdocError::Deserialization {
        artifact: "semantic",
        message,
    };
    let sql = |e: rusqlite::Error| SecdocError::Deserialization {
        artifact: "semantic",
        message: e.to_string(),
    };

    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(sql)?;
    let metadata = |key: &str| -> Result<String, SecdocError> {
        conn.query_row("SELECT value FROM metadata WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .map_err(|e| corrupt(format!("metadata '{key}': {e}")))
    };
    let number = |key: &str| -> Result<usize, SecdocError> {
        let value = metadata(key)?;
        value
            .parse()
            .map_err(|_| corrupt(format!("metadata '{key}' is not a number: '{value}'")))
    };

    let version = number("format_version")?;
    if version != FORMAT_VERSION as usize {
        return Err(corrupt(format!("unsupported format version {version}")));
    }
    let fingerprint = metadata("fingerprint")?;
    let chunk_count = number("chunk_count")?;
    let dimensions = number("dimensions")?;
    let embedding_bytes = dimensions
        .checked_mul(std::mem::size_of::<f32>())
        .ok_or_else(|| corrupt(format!("metadata 'dimensions' out of range: {dimensions}")))?;

    let mut stmt = conn
        .prepare(
            "SELECT id, source, logical_page, language, content, embedding
             FROM chunks ORDER BY ordinal",
        )
        .map_err(sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Vec<u8>>(5)?,
            ))
        })
        .map_err(sql)?;

    // header values are untrusted; grow from the rows actually present
    let mut chunks = Vec::new();
    let mut vectors = Vec::new();
    for row in rows {
        let (id, source, logical_page, language, content, embedding) = row.map_err(sql)?;
        let language: Language = language.parse().map_err(corrupt)?;
        if embedding.len() != embedding_bytes {
            return Err(corrupt(format!(
                "chunk {id} has a {}-byte embedding, expected {embedding_bytes}",
                embedding.len()
            )));
        }
        chunks.push(Chunk {
            id,
            content,
            source,
            logical_page,
            language,
        });
        vectors.push(bytes_to_floats(&embedding));
    }
    if chunks.len() != chunk_count {
        return Err(corrupt(format!(
            "header says {chunk_count} chunks, found {}",
            chunks.len()
        )));
    }

    let index = SemanticIndex::restore(chunks, vectors).map_err(|e| corrupt(e.to_string()))?;
    Ok((fingerprint, index))
}

fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    floats.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
