//! Enrichment payloads exchanged with the generation service and record store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::work::WorkKey;

/// Request sent to the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentRequest {
    /// Normalized word
    pub word: String,

    /// Language tag
    pub language: String,
}

impl From<&WorkKey> for EnrichmentRequest {
    fn from(key: &WorkKey) -> Self {
        Self {
            word: key.word.clone(),
            language: key.language.clone(),
        }
    }
}

/// Response of the text-enrichment call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEnrichment {
    pub definition: String,
    pub etymology: String,

    /// Reference to the generated pronunciation audio
    pub audio_ref: String,
}

/// Response of the image-generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    /// Reference to the generated illustration
    pub image_ref: String,
}

/// The fully enriched learning record.
///
/// Written to the record store exactly once per key and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub definition: String,
    pub etymology: String,
    pub audio_ref: String,
    pub image_ref: String,
    pub generated_at: DateTime<Utc>,
}

impl EnrichmentResult {
    /// Combine both service responses into a record.
    pub fn new(text: TextEnrichment, image: ImageAsset, generated_at: DateTime<Utc>) -> Self {
        Self {
            definition: text.definition,
            etymology: text.etymology,
            audio_ref: text.audio_ref,
            image_ref: image.image_ref,
            generated_at,
        }
    }
}
