//! Generation service trait.

use async_trait::async_trait;

use crate::error::ServiceResult;
use crate::types::enrichment::{EnrichmentRequest, ImageAsset, TextEnrichment};

/// External service producing learning content for a word.
///
/// Implementations must return errors that classify cleanly into
/// transient and fatal (see [`ServiceError::kind`]). Timeouts are
/// applied by the caller.
///
/// [`ServiceError::kind`]: crate::error::ServiceError::kind
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Definition, etymology and pronunciation audio reference.
    async fn enrich_text(&self, request: &EnrichmentRequest) -> ServiceResult<TextEnrichment>;

    /// Illustration for the word, given its text enrichment.
    async fn generate_image(
        &self,
        request: &EnrichmentRequest,
        text: &TextEnrichment,
    ) -> ServiceResult<ImageAsset>;
}

#[async_trait]
impl<T: Enricher + ?Sized> Enricher for std::sync::Arc<T> {
    async fn enrich_text(&self, request: &EnrichmentRequest) -> ServiceResult<TextEnrichment> {
        (**self).enrich_text(request).await
    }

    async fn generate_image(
        &self,
        request: &EnrichmentRequest,
        text: &TextEnrichment,
    ) -> ServiceResult<ImageAsset> {
        (**self).generate_image(request, text).await
    }
}
