//! Overlapping fixed-size chunking of page text.
//!
//! Pages are cut into windows of at most `chunk_size` characters. Each cut
//! lands on the largest separator available in the window (paragraph break,
//! then line break, then space) and falls back to a hard cut. Consecutive
//! chunks of a page share exactly `overlap` characters.

use secdoc_core::{Chunk, ChunkingConfig, PageDocument, SecdocError};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Separators in priority order; a hard cut is used when none fits.
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Splits pages into overlapping chunks.
///
/// # Examples
///
/// ```
/// use secdoc_core::{Language, PageDocument};
/// use secdoc_retrieval::chunker::Chunker;
///
/// let chunker = Chunker::new(1100, 200).unwrap();
/// let page = PageDocument::new("Short page.", "nist.pdf", "4", Language::English);
/// let chunks = chunker.split(&[page]);
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].content, "Short page.");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Create a chunker, measuring sizes in characters.
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::Config`] unless `0 <= overlap < chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, SecdocError> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(SecdocError::Config(format!(
                "invalid chunking: chunk_size={chunk_size}, overlap={overlap} (need overlap < chunk_size)"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Create a chunker from a [`ChunkingConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::Config`] for an invalid size/overlap pair.
    pub fn from_config(config: &ChunkingConfig) -> Result<Self, SecdocError> {
        Self::new(config.chunk_size, config.overlap)
    }

    /// Split every page, in order. Blank pages produce no chunks.
    ///
    /// Every chunk copies its page's `source`, `logical_page` and `language`.
    pub fn split(&self, pages: &[PageDocument]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for page in pages {
            if page.content.trim().is_empty() {
                debug!(source = %page.source, page = %page.logical_page, "skipping blank page");
                continue;
            }
            for piece in split_text(&page.content, self.chunk_size, self.overlap) {
                let id = chunk_id(chunks.len(), page, &piece);
                chunks.push(Chunk {
                    id,
                    content: piece,
                    source: page.source.clone(),
                    logical_page: page.logical_page.clone(),
                    language: page.language,
                });
            }
        }
        debug!(
            pages = pages.len(),
            chunks = chunks.len(),
            chunk_size = self.chunk_size,
            overlap = self.overlap,
            "split pages"
        );
        chunks
    }
}

/// Split `pages` with the given window and overlap.
///
/// # Errors
///
/// Returns [`SecdocError::Config`] unless `overlap < chunk_size`.
pub fn split(
    pages: &[PageDocument],
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, SecdocError> {
    Ok(Chunker::new(chunk_size, overlap)?.split(pages))
}

fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    loop {
        let limit = (start + chunk_size).min(chars.len());
        if limit == chars.len() {
            pieces.push(chars[start..limit].iter().collect());
            break;
        }
        // A cut must leave room past the overlap so the next window advances.
        let end = find_break(&chars, start + overlap + 1, limit).unwrap_or(limit);
        pieces.push(chars[start..end].iter().collect());
        start = end - overlap;
    }
    pieces
}

/// Latest end position in `[min_end, limit]` that closes on the highest-priority separator.
fn find_break(chars: &[char], min_end: usize, limit: usize) -> Option<usize> {
    for sep in SEPARATORS {
        let sep: Vec<char> = sep.chars().collect();
        let lower = min_end.max(sep.len());
        let mut end = limit;
        while end >= lower {
            if chars[end - sep.len()..end] == sep[..] {
                return Some(end);
            }
            end -= 1;
        }
    }
    None
}

fn chunk_id(seq: usize, page: &PageDocument, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seq.to_le_bytes());
    for part in [&page.source, &page.logical_page, content] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secdoc_core::Language;

    fn page(content: &str) -> PageDocument {
        PageDocument::new(content, "iso-27001.pdf", "12b", Language::English)
    }

    /// Rebuild the page text by dropping each chunk's shared prefix.
    fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
        let mut text = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let skip = if i == 0 { 0 } else { overlap };
            text.extend(chunk.content.chars().skip(skip));
        }
        text
    }

    #[test]
    fn short_page_yields_single_chunk() {
        let chunks = split(&[page("firewall rules")], 100, 20).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "firewall rules");
    }

    #[test]
    fn metadata_is_inherited() {
        let thai = PageDocument::new("นโยบายรหัสผ่าน", "thailand-web-security.pdf", "33a", Language::Thai);
        let chunks = split(&[thai], 100, 10).unwrap();
        assert_eq!(chunks[0].source, "thailand-web-security.pdf");
        assert_eq!(chunks[0].logical_page, "33a");
        assert_eq!(chunks[0].language, Language::Thai);
    }

    #[test]
    fn adjacent_chunks_share_exact_overlap() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu nu xi omicron pi rho";
        let chunks = split(&[page(text)], 20, 5).unwrap();
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].content.chars().collect();
            let next: Vec<char> = pair[1].content.chars().collect();
            assert_eq!(prev[prev.len() - 5..], next[..5]);
        }
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 20);
        }
        assert_eq!(reassemble(&chunks, 5), text);
    }

    #[test]
    fn no_content_is_lost_across_configurations() {
        let text = "Section 1\n\nAccess control policy shall be defined.\nUsers must authenticate.\n\n\
                    Section 2\n\nLogs are retained for ninety days and reviewed weekly by the SOC.";
        for (size, overlap) in [(10, 0), (16, 3), (25, 10), (40, 39), (7, 6)] {
            let chunks = split(&[page(text)], size, overlap).unwrap();
            assert_eq!(reassemble(&chunks, overlap), text, "size={size} overlap={overlap}");
        }
    }

    #[test]
    fn prefers_paragraph_break() {
        let text = "aaaa bbbb\n\ncccc dddd eeee";
        let chunks = split(&[page(text)], 16, 0).unwrap();
        assert_eq!(chunks[0].content, "aaaa bbbb\n\n");
        assert_eq!(chunks[1].content, "cccc dddd eeee");
    }

    #[test]
    fn falls_back_to_space_then_hard_cut() {
        let spaced = split(&[page("abc def ghi jkl")], 9, 0).unwrap();
        assert_eq!(spaced[0].content, "abc def ");

        let solid = split(&[page("abcdefghijkl")], 5, 1).unwrap();
        assert_eq!(solid[0].content, "abcde");
        assert_eq!(solid[1].content, "efghi");
        assert_eq!(solid[2].content, "ijkl");
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "การควบคุมการเข้าถึงระบบสารสนเทศ";
        let chunks = split(&[page(text)], 10, 2).unwrap();
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 10);
        }
        assert_eq!(reassemble(&chunks, 2), text);
    }

    #[test]
    fn splitting_is_deterministic() {
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let a = split(&[page(text)], 15, 4).unwrap();
        let b = split(&[page(text)], 15, 4).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn ids_are_unique_for_repeated_content() {
        let chunks = split(&[page("same text"), page("same text")], 100, 0).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_ne!(chunks[0].id, chunks[1].id);
    }

    #[test]
    fn blank_pages_are_skipped() {
        let chunks = split(&[page("  \n "), page("content")], 100, 0).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn rejects_overlap_not_below_size() {
        assert!(Chunker::new(10, 10).is_err());
        assert!(Chunker::new(0, 0).is_err());
    }
}
