//! Reading page documents exported by the ingestion pipeline.
//!
//! The export is a JSON array of `{ "content", "metadata": { "source",
//! "logical_page", "language" } }` objects. Page labels may be strings or
//! numbers. Missing metadata falls back to source `"unknown"`, page `"-"`
//! and English.

use std::path::Path;

use secdoc_core::{Language, PageDocument, SecdocError};
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Deserialize)]
struct RawPage {
    content: String,
    #[serde(default)]
    metadata: RawMetadata,
}

#[derive(Deserialize, Default)]
struct RawMetadata {
    source: Option<String>,
    logical_page: Option<PageLabel>,
    language: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PageLabel {
    Text(String),
    Number(serde_json::Number),
}

impl PageLabel {
    fn into_label(self) -> String {
        match self {
            PageLabel::Text(label) => label,
            PageLabel::Number(n) => n.to_string(),
        }
    }
}

/// Load page documents from a pipeline export at `path`.
///
/// Pages with blank content are skipped.
///
/// # Errors
///
/// Returns [`SecdocError::FileNotFound`] if `path` does not exist,
/// [`SecdocError::Io`] if it cannot be read, and
/// [`SecdocError::Deserialization`] if the JSON is malformed or a page has
/// an unknown language tag.
///
/// # Examples
///
/// ```
/// use secdoc_core::Language;
/// use secdoc_retrieval::ingest::load_pages;
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("pages.json");
/// std::fs::write(
///     &path,
///     r#"[{"content": "ต้องติดตั้งไฟร์วอลล์", "metadata": {"source": "thai.pdf", "logical_page": 10, "language": "th"}}]"#,
/// )
/// .unwrap();
///
/// let pages = load_pages(&path).unwrap();
/// assert_eq!(pages[0].logical_page, "10");
/// assert_eq!(pages[0].language, Language::Thai);
/// ```
pub fn load_pages(path: &Path) -> Result<Vec<PageDocument>, SecdocError> {
    if !path.exists() {
        return Err(SecdocError::FileNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    let pages = parse_pages(&content)?;
    info!(path = %path.display(), pages = pages.len(), "loaded page documents");
    Ok(pages)
}

/// Parse a pipeline export from a JSON string.
///
/// # Errors
///
/// Returns [`SecdocError::Deserialization`] on malformed input.
pub fn parse_pages(json: &str) -> Result<Vec<PageDocument>, SecdocError> {
    let malformed = |message: String| SecdocError::Deserialization {
        artifact: "pages",
        message,
    };
    let raw: Vec<RawPage> = serde_json::from_str(json).map_err(|e| malformed(e.to_string()))?;

    let mut pages = Vec::with_capacity(raw.len());
    for (i, page) in raw.into_iter().enumerate() {
        if page.content.trim().is_empty() {
            debug!(page = i, "skipping blank page");
            continue;
        }
        let meta = page.metadata;
        let language = match meta.language {
            Some(tag) => tag
                .parse::<Language>()
                .map_err(|e| malformed(format!("page {i}: {e}")))?,
            None => Language::default(),
        };
        pages.push(PageDocument {
            content: page.content,
            source: meta.source.unwrap_or_else(|| "unknown".into()),
            logical_page: meta
                .logical_page
                .map_or_else(|| "-".into(), PageLabel::into_label),
            language,
        });
    }
    Ok(pages)
}
