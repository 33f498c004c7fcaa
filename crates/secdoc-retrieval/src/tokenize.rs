//! Language-aware tokenization shared by index build and query.
//!
//! Thai has no whitespace between words, so Thai script runs are segmented by
//! longest dictionary match. Everything else splits on non-alphanumeric
//! characters and is lowercased.

use std::collections::HashSet;
use std::path::Path;

use secdoc_core::{Language, SecdocError};

const BUILTIN_WORDS: &str = include_str!("data/thai_words.txt");

/// Dictionary-backed tokenizer.
///
/// A lexical index owns one `Tokenizer` and uses it for both its corpus and
/// its queries, so the two can never drift apart.
///
/// # Examples
///
/// ```
/// use secdoc_retrieval::tokenize::Tokenizer;
///
/// let tokenizer = Tokenizer::builtin();
/// assert_eq!(
///     tokenizer.tokenize("นโยบายรหัสผ่าน for MFA", None),
///     vec!["นโยบาย", "รหัสผ่าน", "for", "mfa"],
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokenizer {
    words: HashSet<String>,
    max_len: usize,
}

impl Tokenizer {
    /// Tokenizer over the built-in Thai lexicon.
    pub fn builtin() -> Self {
        Self::from_words(builtin_words())
    }

    /// Tokenizer over exactly `words`.
    pub fn from_words<I, W>(words: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: AsRef<str>,
    {
        let words: HashSet<String> = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_string())
            .filter(|w| !w.is_empty())
            .collect();
        let max_len = words.iter().map(|w| w.chars().count()).max().unwrap_or(0);
        Self { words, max_len }
    }

    /// Built-in lexicon plus one word per line from `path` (`#` starts a comment).
    ///
    /// # Errors
    ///
    /// Returns [`SecdocError::FileNotFound`] if `path` does not exist, or
    /// [`SecdocError::Io`] if it cannot be read.
    pub fn with_dictionary(path: &Path) -> Result<Self, SecdocError> {
        if !path.exists() {
            return Err(SecdocError::FileNotFound(path.to_path_buf()));
        }
        let extra = std::fs::read_to_string(path)?;
        let words = builtin_words().chain(lexicon_lines(&extra).map(str::to_string));
        Ok(Self::from_words(words))
    }

    /// Dictionary words in sorted order, for persistence.
    pub fn words(&self) -> Vec<String> {
        let mut words: Vec<String> = self.words.iter().cloned().collect();
        words.sort();
        words
    }

    /// Split `text` into index terms.
    ///
    /// Script detection decides segmentation per run; an English hint only
    /// lets text with no Thai characters skip the dictionary pass. The hint
    /// never changes the tokens produced.
    pub fn tokenize(&self, text: &str, hint: Option<Language>) -> Vec<String> {
        if hint == Some(Language::English) && !text.chars().any(is_thai_block) {
            return latin_terms(text);
        }

        let mut tokens = Vec::new();
        let mut thai_run: Vec<char> = Vec::new();
        let mut word = String::new();

        for c in text.chars() {
            if is_thai_letter(c) {
                flush_word(&mut word, &mut tokens);
                thai_run.push(c);
            } else if c.is_alphanumeric() && !is_thai_block(c) {
                self.flush_thai(&mut thai_run, &mut tokens);
                word.extend(c.to_lowercase());
            } else {
                flush_word(&mut word, &mut tokens);
                self.flush_thai(&mut thai_run, &mut tokens);
            }
        }
        flush_word(&mut word, &mut tokens);
        self.flush_thai(&mut thai_run, &mut tokens);
        tokens
    }

    fn flush_thai(&self, run: &mut Vec<char>, out: &mut Vec<String>) {
        if !run.is_empty() {
            self.segment(run, out);
            run.clear();
        }
    }

    /// Longest-match segmentation; unmatched stretches become one token.
    fn segment(&self, run: &[char], out: &mut Vec<String>) {
        let mut i = 0;
        let mut unknown_from: Option<usize> = None;
        while i < run.len() {
            match self.longest_match(run, i) {
                Some(len) => {
                    if let Some(start) = unknown_from.take() {
                        out.push(run[start..i].iter().collect());
                    }
                    out.push(run[i..i + len].iter().collect());
                    i += len;
                }
                None => {
                    unknown_from.get_or_insert(i);
                    i += 1;
                }
            }
        }
        if let Some(start) = unknown_from {
            out.push(run[start..].iter().collect());
        }
    }

    fn longest_match(&self, run: &[char], at: usize) -> Option<usize> {
        if is_thai_mark(run[at]) {
            return None;
        }
        let longest = self.max_len.min(run.len() - at);
        (1..=longest).rev().find(|&len| {
            // never cut a consonant away from its trailing vowel or tone mark
            let splits_cluster = run.get(at + len).is_some_and(|c| is_thai_mark(*c));
            !splits_cluster && self.words.contains(&run[at..at + len].iter().collect::<String>())
        })
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::builtin()
    }
}

fn builtin_words() -> impl Iterator<Item = String> {
    lexicon_lines(BUILTIN_WORDS).map(str::to_string)
}

fn lexicon_lines(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
}

fn flush_word(word: &mut String, out: &mut Vec<String>) {
    if !word.is_empty() {
        out.push(std::mem::take(word));
    }
}

fn latin_terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.chars().flat_map(char::to_lowercase).collect())
        .collect()
}

fn is_thai_block(c: char) -> bool {
    ('\u{0E00}'..='\u{0E7F}').contains(&c)
}

/// Thai block characters that belong inside words (excludes ฯ, ๆ, ๏, ๚, ๛).
fn is_thai_letter(c: char) -> bool {
    matches!(c, '\u{0E01}'..='\u{0E2E}' | '\u{0E30}'..='\u{0E3A}' | '\u{0E40}'..='\u{0E45}' | '\u{0E47}'..='\u{0E4E}' | '\u{0E50}'..='\u{0E59}')
}

/// Above/below vowels and tone marks that cannot start a word.
fn is_thai_mark(c: char) -> bool {
    matches!(c, '\u{0E31}' | '\u{0E34}'..='\u{0E3A}' | '\u{0E47}'..='\u{0E4E}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_splits_on_punctuation_and_lowercases() {
        let tokenizer = Tokenizer::builtin();
        assert_eq!(
            tokenizer.tokenize("OWASP ASVS-4.0: MFA, required!", None),
            vec!["owasp", "asvs", "4", "0", "mfa", "required"]
        );
    }

    #[test]
    fn thai_uses_longest_match() {
        let tokenizer = Tokenizer::builtin();
        assert_eq!(
            tokenizer.tokenize("การควบคุมการเข้าถึงระบบสารสนเทศ", Some(Language::Thai)),
            vec!["การควบคุม", "การเข้าถึง", "ระบบ", "สารสนเทศ"]
        );
    }

    #[test]
    fn unknown_thai_stretch_stays_together() {
        let tokenizer = Tokenizer::from_words(["ระบบ"]);
        assert_eq!(
            tokenizer.tokenize("ระบบกขค", None),
            vec!["ระบบ", "กขค"]
        );
    }

    #[test]
    fn match_does_not_split_vowel_cluster() {
        // matching a bare "ก" would orphan the tone mark
        let tokenizer = Tokenizer::from_words(["ก", "กา"]);
        assert_eq!(tokenizer.tokenize("ก่า", None), vec!["ก่า"]);
    }

    #[test]
    fn mixed_script_text() {
        let tokenizer = Tokenizer::builtin();
        assert_eq!(
            tokenizer.tokenize("ไฟร์วอลล์ DMZ ต้องตั้งค่า", None),
            vec!["ไฟร์วอลล์", "dmz", "ต้อง", "ตั้งค่า"]
        );
    }

    #[test]
    fn hint_never_changes_tokens() {
        let tokenizer = Tokenizer::builtin();
        for text in ["Password complexity", "รหัสผ่าน complexity", ""] {
            let none = tokenizer.tokenize(text, None);
            assert_eq!(tokenizer.tokenize(text, Some(Language::English)), none);
            assert_eq!(tokenizer.tokenize(text, Some(Language::Thai)), none);
        }
    }

    #[test]
    fn whitespace_yields_no_tokens() {
        let tokenizer = Tokenizer::builtin();
        assert!(tokenizer.tokenize(" \n\t ", None).is_empty());
    }

    #[test]
    fn custom_dictionary_extends_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.txt");
        std::fs::write(&path, "# extra\nพาสคีย์\n").unwrap();

        let tokenizer = Tokenizer::with_dictionary(&path).unwrap();
        assert_eq!(tokenizer.tokenize("พาสคีย์", None), vec!["พาสคีย์"]);
        assert!(tokenizer.words().iter().any(|w| w == "รหัสผ่าน"));
    }

    #[test]
    fn missing_dictionary_is_reported() {
        let err = Tokenizer::with_dictionary(Path::new("/nonexistent/words.txt")).unwrap_err();
        assert!(matches!(err, SecdocError::FileNotFound(_)));
    }

    #[test]
    fn words_roundtrip_through_persistence_form() {
        let tokenizer = Tokenizer::builtin();
        assert_eq!(Tokenizer::from_words(tokenizer.words()), tokenizer);
    }
}
