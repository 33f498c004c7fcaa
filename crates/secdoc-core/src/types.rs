use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Language tag carried by pages and chunks.
///
/// # Examples
///
/// ```
/// use secdoc_core::Language;
///
/// let lang: Language = "th".parse().unwrap();
/// assert_eq!(lang, Language::Thai);
/// assert_eq!(Language::English.to_string(), "en");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    /// English text.
    #[default]
    #[serde(rename = "en")]
    English,
    /// Thai text (no whitespace word boundaries).
    #[serde(rename = "th")]
    Thai,
}

impl Language {
    /// Short tag used in metadata (`"en"` or `"th"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Thai => "th",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "en" | "eng" | "english" => Ok(Language::English),
            "th" | "tha" | "thai" => Ok(Language::Thai),
            other => Err(format!("unknown language tag: {other}")),
        }
    }
}

/// Full extracted text of one page, as delivered by the ingestion pipeline.
///
/// # Examples
///
/// ```
/// use secdoc_core::{Language, PageDocument};
///
/// let page = PageDocument::new("A.1 Access control", "iso-27001.pdf", "12b", Language::English);
/// assert_eq!(page.logical_page, "12b");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDocument {
    /// Page text.
    pub content: String,
    /// Originating document identifier (usually the file name).
    pub source: String,
    /// Human-facing page label, possibly non-numeric.
    pub logical_page: String,
    /// Language of the page.
    pub language: Language,
}

impl PageDocument {
    /// Create a page from its parts.
    pub fn new(
        content: impl Into<String>,
        source: impl Into<String>,
        logical_page: impl Into<String>,
        language: Language,
    ) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            logical_page: logical_page.into(),
            language,
        }
    }
}

/// A contiguous span of page text; the atomic retrieval unit.
///
/// `id` is assigned by the chunker and is unique within one build.
///
/// # Examples
///
/// ```
/// use secdoc_core::{Chunk, Language};
///
/// let chunk = Chunk {
///     id: "3f2a9c01d4e5b6a7".into(),
///     content: "Enable MFA for administrators".into(),
///     source: "owasp-asvs.pdf".into(),
///     logical_page: "7".into(),
///     language: Language::English,
/// };
/// assert_eq!(chunk.citation(), "owasp-asvs.pdf, p. 7");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Stable identity within a build.
    pub id: String,
    /// Chunk text.
    pub content: String,
    /// Originating document identifier.
    pub source: String,
    /// Human-facing page label.
    pub logical_page: String,
    /// Language of the source page.
    pub language: Language,
}

impl Chunk {
    /// Short `source, p. page` label for citation rendering.
    pub fn citation(&self) -> String {
        format!("{}, p. {}", self.source, self.logical_page)
    }
}

/// Which retriever(s) produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Lexical (BM25) retrieval only.
    Lexical,
    /// Semantic (embedding) retrieval only.
    Semantic,
    /// Both retrievers returned the chunk.
    Both,
}

impl Origin {
    /// Combine the origin of an existing candidate with another side.
    ///
    /// # Examples
    ///
    /// ```
    /// use secdoc_core::Origin;
    ///
    /// assert_eq!(Origin::Lexical.merge(Origin::Semantic), Origin::Both);
    /// assert_eq!(Origin::Lexical.merge(Origin::Lexical), Origin::Lexical);
    /// ```
    pub fn merge(self, other: Origin) -> Origin {
        if self == other {
            self
        } else {
            Origin::Both
        }
    }
}

/// A chunk with its combined retrieval score, alive for one query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// Combined ensemble score.
    pub score: f64,
    /// Which retriever(s) produced it.
    pub origin: Origin,
}

/// A final search result: a chunk and the reranker's relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedChunk {
    /// The evidence chunk.
    pub chunk: Chunk,
    /// Pairwise relevance score from the reranker.
    pub score: f64,
}

/// Output format for CLI results.
///
/// # Examples
///
/// ```
/// use secdoc_core::OutputFormat;
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}
