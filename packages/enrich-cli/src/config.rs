use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the generation service (required for runs)
    pub service_url: Option<String>,
    pub api_key: Option<String>,
    pub database_url: String,
    pub checkpoint: PathBuf,
    pub requests_per_second: u32,

    /// Requests allowed back to back before the rate applies
    pub burst: Option<u32>,
    pub max_attempts: Option<u32>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            service_url: var("ENRICH_SERVICE_URL"),
            api_key: var("ENRICH_API_KEY"),
            database_url: var("ENRICH_DATABASE_URL")
                .unwrap_or_else(|| "sqlite://enrichments.db?mode=rwc".to_string()),
            checkpoint: var("ENRICH_CHECKPOINT")
                .unwrap_or_else(|| "enrichment.checkpoint.jsonl".to_string())
                .into(),
            requests_per_second: var("ENRICH_REQUESTS_PER_SECOND")
                .unwrap_or_else(|| "2".to_string())
                .parse()
                .context("ENRICH_REQUESTS_PER_SECOND must be a valid number")?,
            burst: var("ENRICH_BURST")
                .map(|v| v.parse())
                .transpose()
                .context("ENRICH_BURST must be a valid number")?,
            max_attempts: var("ENRICH_MAX_ATTEMPTS")
                .map(|v| v.parse())
                .transpose()
                .context("ENRICH_MAX_ATTEMPTS must be a valid number")?,
        })
    }

    pub fn service_url(&self) -> Result<&str> {
        self.service_url
            .as_deref()
            .context("ENRICH_SERVICE_URL must be set")
    }
}
