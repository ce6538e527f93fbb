//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the enrichment
//! library without calling a real generation service.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{ServiceError, ServiceResult};
use crate::traits::enricher::Enricher;
use crate::types::enrichment::{EnrichmentRequest, ImageAsset, TextEnrichment};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A mock generation service for testing.
///
/// Succeeds with deterministic content unless scripted otherwise.
/// Scripted failures are consumed in order, per word; permanent
/// rejections apply to every call for that word.
#[derive(Default)]
pub struct MockEnricher {
    /// Failures returned by upcoming text calls, by word
    text_failures: Arc<Mutex<HashMap<String, VecDeque<ServiceError>>>>,

    /// Failures returned by upcoming image calls, by word
    image_failures: Arc<Mutex<HashMap<String, VecDeque<ServiceError>>>>,

    /// Words whose text call always fails
    rejections: Arc<Mutex<HashMap<String, ServiceError>>>,

    /// Simulated latency per call
    delay: Option<Duration>,

    /// Call tracking for assertions
    calls: Arc<Mutex<Vec<MockEnricherCall>>>,

    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Record of a call made to the mock enricher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEnricherCall {
    Text { word: String },
    Image { word: String },
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockEnricher {
    /// Create a mock that succeeds for every word.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next text call for `word` with `error`.
    pub fn fail_text(self, word: impl Into<String>, error: ServiceError) -> Self {
        self.fail_text_times(word, 1, error)
    }

    /// Fail the next `times` text calls for `word` with `error`.
    pub fn fail_text_times(self, word: impl Into<String>, times: usize, error: ServiceError) -> Self {
        locked(&self.text_failures)
            .entry(word.into())
            .or_default()
            .extend(std::iter::repeat(error).take(times));
        self
    }

    /// Fail the next image call for `word` with `error`.
    pub fn fail_image(self, word: impl Into<String>, error: ServiceError) -> Self {
        locked(&self.image_failures)
            .entry(word.into())
            .or_default()
            .push_back(error);
        self
    }

    /// Fail every text call for `word` with `error`.
    pub fn reject(self, word: impl Into<String>, error: ServiceError) -> Self {
        locked(&self.rejections).insert(word.into(), error);
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get all recorded calls.
    pub fn calls(&self) -> Vec<MockEnricherCall> {
        locked(&self.calls).clone()
    }

    /// Number of text calls made for `word`.
    pub fn text_calls(&self, word: &str) -> usize {
        locked(&self.calls)
            .iter()
            .filter(|c| matches!(c, MockEnricherCall::Text { word: w } if w == word))
            .count()
    }

    /// Number of image calls made for `word`.
    pub fn image_calls(&self, word: &str) -> usize {
        locked(&self.calls)
            .iter()
            .filter(|c| matches!(c, MockEnricherCall::Image { word: w } if w == word))
            .count()
    }

    /// Highest number of calls observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: MockEnricherCall) -> InFlight<'_> {
        locked(&self.calls).push(call);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        guard
    }
}

#[async_trait]
impl Enricher for MockEnricher {
    async fn enrich_text(&self, request: &EnrichmentRequest) -> ServiceResult<TextEnrichment> {
        let _guard = self
            .enter(MockEnricherCall::Text {
                word: request.word.clone(),
            })
            .await;

        if let Some(error) = locked(&self.rejections).get(&request.word) {
            return Err(error.clone());
        }
        if let Some(error) = locked(&self.text_failures)
            .get_mut(&request.word)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        Ok(TextEnrichment {
            definition: format!("definition of {}", request.word),
            etymology: format!("etymology of {}", request.word),
            audio_ref: format!("audio/{}/{}.mp3", request.language, request.word),
        })
    }

    async fn generate_image(
        &self,
        request: &EnrichmentRequest,
        _text: &TextEnrichment,
    ) -> ServiceResult<ImageAsset> {
        let _guard = self
            .enter(MockEnricherCall::Image {
                word: request.word.clone(),
            })
            .await;

        if let Some(error) = locked(&self.image_failures)
            .get_mut(&request.word)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        Ok(ImageAsset {
            image_ref: format!("img/{}/{}.png", request.language, request.word),
        })
    }
}
