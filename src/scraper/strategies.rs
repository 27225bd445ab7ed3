//! Structured extraction strategies, highest confidence first.
//!
//! Each strategy turns a fetched page into an [`AvailabilitySnapshot`] or
//! explains why it could not. A rejection never aborts the cascade.

use crate::config::TargetConfig;
use crate::error::StrategyError;
use crate::models::{AvailabilitySnapshot, Document, StrategyId};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use super::cleaner::{BLOCKED_DAYS_FIELDS, decode_entities, value_to_snapshot};
use super::parsers::{embedded_payloads, enclosing_objects, script_bodies};
use super::{DocumentExtractor, PageFetcher};

// ── 1. Embedded data attribute ────────────────────────────────────────────────

pub struct EmbeddedAttribute;

fn parse_payload(payload: &str) -> Result<AvailabilitySnapshot, StrategyError> {
    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        // Some pages encode the attribute twice
        Err(_) => serde_json::from_str(&decode_entities(payload))?,
    };
    value_to_snapshot(&value)
}

#[async_trait]
impl DocumentExtractor for EmbeddedAttribute {
    fn id(&self) -> StrategyId {
        StrategyId::EmbeddedAttribute
    }

    async fn extract(&self, doc: &Document) -> Result<AvailabilitySnapshot, StrategyError> {
        let mut last = StrategyError::NotFound;
        for payload in embedded_payloads(&doc.body) {
            match parse_payload(&payload) {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) => last = e,
            }
        }
        Err(last)
    }
}

// ── 2. Inline script ──────────────────────────────────────────────────────────

pub struct InlineScript;

/// Smallest `{...}` around a known field that parses as a JSON mapping holding it.
fn snapshot_in_script(script: &str) -> Result<AvailabilitySnapshot, StrategyError> {
    let mut last = StrategyError::NotFound;

    for field in BLOCKED_DAYS_FIELDS {
        for (pos, _) in script.match_indices(field) {
            for span in enclosing_objects(script, pos) {
                let value = match serde_json::from_str::<Value>(span) {
                    Ok(v) => v,
                    Err(e) => {
                        last = e.into();
                        continue;
                    }
                };
                let holds_field = value
                    .as_object()
                    .is_some_and(|map| map.contains_key(field));
                if !holds_field {
                    continue;
                }
                match value_to_snapshot(&value) {
                    Ok(snapshot) => return Ok(snapshot),
                    Err(e) => last = e,
                }
            }
        }
    }
    Err(last)
}

pub fn snapshot_from_scripts<'a>(
    scripts: impl IntoIterator<Item = &'a str>,
) -> Result<AvailabilitySnapshot, StrategyError> {
    let mut last = StrategyError::NotFound;
    for script in scripts {
        if !BLOCKED_DAYS_FIELDS.iter().any(|f| script.contains(f)) {
            continue;
        }
        match snapshot_in_script(script) {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) => last = e,
        }
    }
    Err(last)
}

#[async_trait]
impl DocumentExtractor for InlineScript {
    fn id(&self) -> StrategyId {
        StrategyId::InlineScript
    }

    async fn extract(&self, doc: &Document) -> Result<AvailabilitySnapshot, StrategyError> {
        let scripts = script_bodies(&doc.body);
        snapshot_from_scripts(scripts.iter().map(String::as_str))
    }
}

// ── 3. Remote endpoint ────────────────────────────────────────────────────────

/// Paths under the provider's engine URL that have served widget data.
pub const CANDIDATE_PATHS: [&str; 3] = ["availability", "widget/availability", "calendar/data"];

pub struct RemoteEndpoint {
    fetcher: Arc<dyn PageFetcher>,
    target: TargetConfig,
}

impl RemoteEndpoint {
    pub fn new(fetcher: Arc<dyn PageFetcher>, target: TargetConfig) -> Self {
        Self { fetcher, target }
    }

    fn candidate_url(&self, path: &str) -> String {
        format!("{}/{}", self.target.api_base.trim_end_matches('/'), path)
    }

    fn read_response(body: &str) -> Result<AvailabilitySnapshot, StrategyError> {
        let trimmed = body.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                return value_to_snapshot(&value);
            }
        }
        if BLOCKED_DAYS_FIELDS.iter().any(|f| body.contains(f)) {
            let scripts = script_bodies(body);
            return snapshot_from_scripts(scripts.iter().map(String::as_str));
        }
        Err(StrategyError::NotFound)
    }
}

#[async_trait]
impl DocumentExtractor for RemoteEndpoint {
    fn id(&self) -> StrategyId {
        StrategyId::RemoteEndpoint
    }

    async fn extract(&self, _doc: &Document) -> Result<AvailabilitySnapshot, StrategyError> {
        let params = [
            ("token", self.target.booking_token.as_str()),
            ("propertyId", self.target.property_id.as_str()),
            ("widgetContainer", self.target.container_id.as_str()),
        ];
        let headers = [
            ("Referer", self.target.url.as_str()),
            ("X-Requested-With", "XMLHttpRequest"),
        ];

        let mut last = StrategyError::NotFound;
        for path in CANDIDATE_PATHS {
            let url = self.candidate_url(path);
            let response = match self.fetcher.fetch(&url, &params, &headers).await {
                Ok(r) => r,
                Err(e) => {
                    debug!("{}: {}", url, e);
                    last = e.into();
                    continue;
                }
            };
            match Self::read_response(&response.body) {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) => {
                    debug!("{}: {}", url, e);
                    last = e;
                }
            }
        }
        Err(last)
    }
}

// ── 4. Regex patterns ─────────────────────────────────────────────────────────

const PATTERNS: [(&str, &str); 4] = [
    (
        "data-assignment",
        r"(?s)(?:sirvoyData|bookingData|widgetData)\s*=\s*(\{.*?\})\s*;",
    ),
    ("widget-init", r"(?s)SirvoyBookingWidget\s*\(\s*(\{.*?\})\s*\)"),
    ("json-parse-literal", r#"(?s)JSON\.parse\(\s*'(\{.*?\})'\s*\)"#),
    ("flat-checkin-object", r"(\{[^{}]*invalidCheckinDays[^{}]*\})"),
];

static COMPILED: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    PATTERNS
        .iter()
        .filter_map(|(name, pattern)| match Regex::new(pattern) {
            Ok(re) => Some((*name, re)),
            Err(e) => {
                warn!("pattern {} did not compile: {}", name, e);
                None
            }
        })
        .collect()
});

pub struct RegexPattern;

fn snapshot_by_patterns(scripts: &[String]) -> Result<AvailabilitySnapshot, StrategyError> {
    let mut last = StrategyError::NotFound;
    for (name, re) in COMPILED.iter() {
        for script in scripts {
            for caps in re.captures_iter(script) {
                let Some(group) = caps.get(1) else { continue };
                let parsed = serde_json::from_str::<Value>(group.as_str())
                    .map_err(StrategyError::from)
                    .and_then(|v| value_to_snapshot(&v));
                match parsed {
                    Ok(snapshot) => {
                        debug!("pattern {} matched", name);
                        return Ok(snapshot);
                    }
                    Err(e) => last = e,
                }
            }
        }
    }
    Err(last)
}

#[async_trait]
impl DocumentExtractor for RegexPattern {
    fn id(&self) -> StrategyId {
        StrategyId::RegexPattern
    }

    async fn extract(&self, doc: &Document) -> Result<AvailabilitySnapshot, StrategyError> {
        snapshot_by_patterns(&script_bodies(&doc.body))
    }
}
