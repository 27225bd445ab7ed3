use crate::config::ScraperConfig;
use crate::error::{AttemptError, FetchError};
use crate::models::Document;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, warn};
use url::Url;

use super::PageFetcher;

pub struct HttpClient {
    inner: reqwest::Client,
    config: ScraperConfig,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let mut defaults = HeaderMap::new();
        defaults.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8"),
        );
        defaults.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("sv-SE,sv;q=0.9,en;q=0.8"),
        );

        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(defaults)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Widget endpoints hand out session cookies on the first page load
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    async fn attempt(&self, url: &Url, headers: &HeaderMap, n: u32) -> Result<Document, AttemptError> {
        debug!("GET {} (attempt {})", url, n);

        let resp = self
            .inner
            .get(url.clone())
            .headers(headers.clone())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AttemptError::Status(status.as_u16()));
        }

        let response_headers = resp.headers().clone();
        let body = resp.text().await?;

        let mut doc = Document::new(url.as_str(), body);
        doc.status = status.as_u16();
        doc.headers = response_headers;
        Ok(doc)
    }
}

/// Delays between attempts: base, 2×base, 4×base, … (`2^attempt` seconds by default).
pub fn backoff_schedule(config: &ScraperConfig) -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(config.retry_base_delay_ms / 2)
        .take(config.max_attempts.saturating_sub(1) as usize)
}

fn build_url(url: &str, params: &[(&str, &str)]) -> Result<Url, AttemptError> {
    let parsed = if params.is_empty() {
        Url::parse(url)
    } else {
        Url::parse_with_params(url, params)
    };
    parsed.map_err(|e| AttemptError::InvalidRequest(format!("{url}: {e}")))
}

fn build_headers(headers: &[(&str, &str)]) -> Result<HeaderMap, AttemptError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AttemptError::InvalidRequest(format!("header {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AttemptError::InvalidRequest(format!("header {name}: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch(
        &self,
        url: &str,
        params: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<Document, FetchError> {
        let prepared = build_url(url, params).and_then(|u| Ok((u, build_headers(headers)?)));
        let (target, extra_headers) = match prepared {
            Ok(p) => p,
            Err(last) => {
                return Err(FetchError {
                    url: url.to_string(),
                    attempts: 0,
                    last,
                });
            }
        };

        let attempts = AtomicU32::new(0);
        let result = Retry::start(backoff_schedule(&self.config), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let target = &target;
            let extra_headers = &extra_headers;
            async move {
                let outcome = self.attempt(target, extra_headers, n).await;
                if let Err(e) = &outcome {
                    warn!("Attempt {} for {} failed: {}", n, target, e);
                }
                outcome
            }
        })
        .await;

        result.map_err(|last| FetchError {
            url: url.to_string(),
            attempts: attempts.load(Ordering::SeqCst),
            last,
        })
    }
}
