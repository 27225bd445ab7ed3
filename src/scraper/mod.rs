pub mod cleaner;
pub mod http_client;
pub mod parsers;
pub mod signature;
pub mod strategies;

use crate::config::TargetConfig;
use crate::error::{FetchError, StrategyError};
use crate::models::{AvailabilitySnapshot, Document, ExtractionResult, StrategyId};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use self::signature::extract_signature;
use self::strategies::{EmbeddedAttribute, InlineScript, RegexPattern, RemoteEndpoint};

// ── Fetch seam ────────────────────────────────────────────────────────────────

/// Swappable page source.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        params: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<Document, FetchError>;

    async fn get(&self, url: &str) -> Result<Document, FetchError> {
        self.fetch(url, &[], &[]).await
    }
}

// ── Extraction seam ───────────────────────────────────────────────────────────

/// One way of reading booking data out of a page.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    fn id(&self) -> StrategyId;

    async fn extract(&self, doc: &Document) -> Result<AvailabilitySnapshot, StrategyError>;
}

/// Ordered strategy table; the first strategy to produce a valid snapshot wins.
pub struct StructuredExtractor {
    strategies: Vec<Box<dyn DocumentExtractor>>,
}

impl StructuredExtractor {
    pub fn new(strategies: Vec<Box<dyn DocumentExtractor>>) -> Self {
        Self { strategies }
    }

    /// The production cascade: attribute, inline script, remote endpoint, regex.
    pub fn standard(fetcher: Arc<dyn PageFetcher>, target: &TargetConfig) -> Self {
        Self::new(vec![
            Box::new(EmbeddedAttribute),
            Box::new(InlineScript),
            Box::new(RemoteEndpoint::new(fetcher, target.clone())),
            Box::new(RegexPattern),
        ])
    }

    pub async fn extract_structured(&self, doc: &Document) -> Option<(AvailabilitySnapshot, StrategyId)> {
        for strategy in &self.strategies {
            match strategy.extract(doc).await {
                Ok(snapshot) => {
                    info!("Booking data found via {}", strategy.id());
                    return Some((snapshot, strategy.id()));
                }
                Err(e) => debug!("{} skipped: {}", strategy.id(), e),
            }
        }
        None
    }

    /// Structured data when possible, otherwise a page signature.
    pub async fn extract(&self, doc: &Document) -> ExtractionResult {
        if doc.is_blank() {
            return ExtractionResult::Failed(format!("empty response body from {}", doc.url));
        }
        if let Some((snapshot, id)) = self.extract_structured(doc).await {
            return ExtractionResult::Structured(snapshot, id);
        }

        info!("No structured booking data; falling back to page signature");
        debug!("Page preview: {}", crate::utils::preview(&doc.body, 500));
        let signature = extract_signature(doc);
        let strategy = signature.strategy;
        ExtractionResult::SignatureOnly(signature, strategy)
    }
}

// ── Test doubles ──────────────────────────────────────────────────────────────
