//! Rate-limited enricher wrapper.
//!
//! Wraps any Enricher implementation with client-side rate limiting
//! using the governor crate, so a run stays under the service quota
//! instead of collecting 429s.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::error::ServiceResult;
use crate::traits::enricher::Enricher;
use crate::types::enrichment::{EnrichmentRequest, ImageAsset, TextEnrichment};

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

fn at_least_one(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap_or(nonzero!(1u32))
}

/// An enricher wrapper that enforces rate limits.
///
/// Text and image calls draw from the same quota.
pub struct RateLimitedEnricher<E: Enricher> {
    inner: E,
    limiter: Arc<DefaultRateLimiter>,
}

impl<E: Enricher> RateLimitedEnricher<E> {
    /// Create a new rate-limited enricher.
    ///
    /// A rate of zero is treated as one request per second.
    pub fn new(enricher: E, requests_per_second: u32) -> Self {
        Self::with_quota(enricher, Quota::per_second(at_least_one(requests_per_second)))
    }

    /// Create with a custom quota.
    pub fn with_quota(enricher: E, quota: Quota) -> Self {
        Self {
            inner: enricher,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Create with burst support.
    pub fn with_burst(enricher: E, requests_per_second: u32, burst: u32) -> Self {
        let quota = Quota::per_second(at_least_one(requests_per_second)).allow_burst(at_least_one(burst));
        Self::with_quota(enricher, quota)
    }

    /// The wrapped enricher.
    pub fn inner(&self) -> &E {
        &self.inner
    }

    async fn wait_for_permit(&self) {
        self.limiter.until_ready().await;
    }
}

#[async_trait]
impl<E: Enricher> Enricher for RateLimitedEnricher<E> {
    async fn enrich_text(&self, request: &EnrichmentRequest) -> ServiceResult<TextEnrichment> {
        self.wait_for_permit().await;
        self.inner.enrich_text(request).await
    }

    async fn generate_image(
        &self,
        request: &EnrichmentRequest,
        text: &TextEnrichment,
    ) -> ServiceResult<ImageAsset> {
        self.wait_for_permit().await;
        self.inner.generate_image(request, text).await
    }
}

/// Extension trait for easy rate limiting.
pub trait EnricherExt: Enricher + Sized {
    /// Wrap this enricher with rate limiting.
    fn rate_limited(self, requests_per_second: u32) -> RateLimitedEnricher<Self> {
        RateLimitedEnricher::new(self, requests_per_second)
    }

    /// Wrap with rate limiting and burst support.
    fn rate_limited_with_burst(self, requests_per_second: u32, burst: u32) -> RateLimitedEnricher<Self> {
        RateLimitedEnricher::with_burst(self, requests_per_second, burst)
    }
}

impl<E: Enricher + Sized> EnricherExt for E {}
