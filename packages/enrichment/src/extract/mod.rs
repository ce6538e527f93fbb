//! Extractor - turns source documents into candidate words.
//!
//! Decoding happens once per document; candidates are then produced
//! lazily from the decoded text, and [`DecodedDocument::candidates`]
//! can be called again to restart the sequence.

pub mod decode;
pub mod normalize;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ExtractionError;
use crate::types::candidate::Candidate;

pub use decode::EncodingChain;

/// How a document's text is split into candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentFormat {
    /// One entry per line, `#` comments, optional tab-separated language column
    #[default]
    WordList,
    /// Running text; every word token is a candidate
    Prose,
}

/// A raw source document.
#[derive(Debug, Clone)]
pub struct Document {
    /// Identifier used in logs and candidates (usually the path)
    pub id: String,

    /// Undecoded content
    pub bytes: Vec<u8>,

    /// Default language tag for candidates
    pub language: String,

    pub format: DocumentFormat,
}

impl Document {
    /// Create a word-list document from raw bytes.
    pub fn new(id: impl Into<String>, bytes: impl Into<Vec<u8>>, language: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            bytes: bytes.into(),
            language: language.into(),
            format: DocumentFormat::WordList,
        }
    }

    /// Read a document from disk.
    pub async fn from_path(path: impl AsRef<Path>, language: impl Into<String>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::new(path.display().to_string(), bytes, language))
    }

    /// Set the document format.
    pub fn with_format(mut self, format: DocumentFormat) -> Self {
        self.format = format;
        self
    }
}

/// A document after successful decoding.
#[derive(Debug, Clone)]
pub struct DecodedDocument {
    pub id: String,
    pub language: String,
    pub format: DocumentFormat,

    /// Name of the encoding that decoded the bytes
    pub encoding: &'static str,

    pub text: String,
}

impl DecodedDocument {
    /// Lazily yield candidates in source order.
    pub fn candidates(&self) -> Box<dyn Iterator<Item = Candidate> + '_> {
        let lines = self.text.lines().enumerate().map(|(i, line)| (i + 1, line));
        match self.format {
            DocumentFormat::WordList => Box::new(lines.filter_map(move |(n, line)| self.word_list_entry(n, line))),
            DocumentFormat::Prose => Box::new(lines.flat_map(move |(n, line)| {
                tokenize(line).map(move |token| Candidate::new(token, &self.id, &self.language).at_line(n))
            })),
        }
    }

    fn word_list_entry(&self, line_no: usize, line: &str) -> Option<Candidate> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let mut columns = line.splitn(2, '\t');
        let word = columns.next()?.trim();
        let language = columns
            .next()
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
            .unwrap_or(self.language.as_str());

        Some(Candidate::new(word, &self.id, language).at_line(line_no))
    }
}

/// Split running text into word tokens.
///
/// A token is a run of letters/marks/digits; `'` and `-` are kept when
/// they join two such characters (`aujourd'hui`, `arc-en-ciel`).
fn tokenize(line: &str) -> impl Iterator<Item = &str> {
    let is_word = |c: char| c.is_alphanumeric() || is_mark(c);
    let is_joiner = |c: char| matches!(c, '\'' | '\u{2019}' | '-');

    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let chars: Vec<(usize, char)> = line.char_indices().collect();

    for (i, &(pos, c)) in chars.iter().enumerate() {
        let joins = is_joiner(c)
            && start.is_some()
            && chars.get(i + 1).map_or(false, |&(_, next)| is_word(next));
        if is_word(c) || joins {
            start.get_or_insert(pos);
        } else if let Some(s) = start.take() {
            tokens.push(&line[s..pos]);
        }
    }
    if let Some(s) = start {
        tokens.push(&line[s..]);
    }

    tokens.into_iter()
}

fn is_mark(c: char) -> bool {
    // Combining diacritical marks (decomposed accents)
    matches!(c, '\u{0300}'..='\u{036F}' | '\u{1AB0}'..='\u{1AFF}' | '\u{1DC0}'..='\u{1DFF}' | '\u{20D0}'..='\u{20FF}' | '\u{FE20}'..='\u{FE2F}')
}

/// Decodes documents with a configured encoding chain.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    chain: EncodingChain,
}

impl Extractor {
    /// Create an extractor with the given encoding chain.
    pub fn new(chain: EncodingChain) -> Self {
        Self { chain }
    }

    /// Decode a document. Fails only if no encoding in the chain succeeds.
    pub fn decode(&self, document: &Document) -> Result<DecodedDocument, ExtractionError> {
        let (text, encoding) = self.chain.decode(&document.id, &document.bytes)?;
        debug!(
            document = %document.id,
            encoding = encoding.name(),
            bytes = document.bytes.len(),
            "decoded document"
        );

        Ok(DecodedDocument {
            id: document.id.clone(),
            language: document.language.clone(),
            format: document.format,
            encoding: encoding.name(),
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(doc: &DecodedDocument) -> Vec<String> {
        doc.candidates().map(|c| c.text).collect()
    }

    #[test]
    fn test_word_list_skips_comments_and_blanks() {
        let doc = Document::new("a.txt", "# animals\nchat\n\n  chien  \n", "fr");
        let decoded = Extractor::default().decode(&doc).unwrap();
        assert_eq!(words(&decoded), vec!["chat", "chien"]);

        let lines: Vec<usize> = decoded.candidates().map(|c| c.line).collect();
        assert_eq!(lines, vec![2, 4]);
    }

    #[test]
    fn test_word_list_language_override() {
        let doc = Document::new("mixed.tsv", "chat\nHund\tde\n", "fr");
        let decoded = Extractor::default().decode(&doc).unwrap();
        let langs: Vec<String> = decoded.candidates().map(|c| c.language).collect();
        assert_eq!(langs, vec!["fr", "de"]);
    }

    #[test]
    fn test_candidates_restart() {
        let doc = Document::new("a.txt", "chat\nchien\n", "fr");
        let decoded = Extractor::default().decode(&doc).unwrap();
        assert_eq!(words(&decoded), words(&decoded));
    }

    #[test]
    fn test_prose_tokenization() {
        let doc = Document::new("p.txt", "Aujourd'hui, l'arc-en-ciel brille -- 2024!", "fr")
            .with_format(DocumentFormat::Prose);
        let decoded = Extractor::default().decode(&doc).unwrap();
        assert_eq!(
            words(&decoded),
            vec!["Aujourd'hui", "l'arc-en-ciel", "brille", "2024"]
        );
    }

    #[test]
    fn test_prose_keeps_decomposed_accents() {
        let doc = Document::new("p.txt", "e\u{0301}cole ferme\u{0301}e", "fr")
            .with_format(DocumentFormat::Prose);
        let decoded = Extractor::default().decode(&doc).unwrap();
        assert_eq!(words(&decoded).len(), 2);
    }

    #[test]
    fn test_empty_document_is_not_an_error() {
        let doc = Document::new("empty.txt", Vec::<u8>::new(), "fr");
        let decoded = Extractor::default().decode(&doc).unwrap();
        assert_eq!(decoded.candidates().count(), 0);
    }

    #[test]
    fn test_legacy_encoding_document() {
        let doc = Document::new("legacy.txt", b"ch\xe2teau\nfor\xeat\n".to_vec(), "fr");
        let decoded = Extractor::default().decode(&doc).unwrap();
        assert_eq!(decoded.encoding, "windows-1252");
        assert_eq!(words(&decoded), vec!["château", "forêt"]);
    }

    #[test]
    fn test_page_break_document_is_decoded() {
        let doc = Document::new("pages.txt", "chat\n\x0cchien\n", "fr");
        let decoded = Extractor::default().decode(&doc).unwrap();
        assert_eq!(decoded.encoding, "UTF-8");
        assert_eq!(words(&decoded), vec!["chat", "chien"]);
    }

    #[test]
    fn test_undecodable_document() {
        let doc = Document::new("bad.txt", b"ch\xc3\x28teau".to_vec(), "fr");
        let result = Extractor::new(EncodingChain::utf8_only()).decode(&doc);
        assert!(result.is_err());
    }
}
