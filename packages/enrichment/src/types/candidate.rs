//! Candidates - raw words observed in source documents.

use crate::error::ValidationError;
use crate::types::work::WorkKey;

/// A raw, not-yet-deduplicated word from one source document.
///
/// Transient: produced by the extractor and consumed immediately
/// by the selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Text as it appeared in the document
    pub text: String,

    /// Identifier of the source document
    pub document: String,

    /// Language tag (document default or per-line override)
    pub language: String,

    /// 1-based line the candidate was found on
    pub line: usize,
}

impl Candidate {
    /// Create a new candidate.
    pub fn new(
        text: impl Into<String>,
        document: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            document: document.into(),
            language: language.into(),
            line: 0,
        }
    }

    /// Set the source line.
    pub fn at_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    /// Normalize into the work item key this candidate maps to.
    pub fn key(&self) -> Result<WorkKey, ValidationError> {
        WorkKey::parse(&self.text, &self.language)
    }
}
