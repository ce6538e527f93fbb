//! Generation service clients.

pub mod http;
pub mod rate_limited;

pub use http::HttpEnricher;
pub use rate_limited::{EnricherExt, RateLimitedEnricher};
