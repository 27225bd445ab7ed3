use chrono::NaiveDate;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::SnapshotError;

// ── Fetched document ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Document {
    pub url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl Document {
    pub fn new(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: 200,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.body.trim().is_empty()
    }
}

// ── Strategy identifiers ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    EmbeddedAttribute,
    InlineScript,
    RemoteEndpoint,
    RegexPattern,
    PageSignature,
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EmbeddedAttribute => "embedded-attribute",
            Self::InlineScript => "inline-script",
            Self::RemoteEndpoint => "remote-endpoint",
            Self::RegexPattern => "regex-pattern",
            Self::PageSignature => "page-signature",
        };
        f.write_str(name)
    }
}

// ── Availability snapshot ─────────────────────────────────────────────────────

/// Blocked check-in dates over an inclusive booking window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySnapshot {
    blocked_dates: BTreeSet<NaiveDate>,
    window_start: NaiveDate,
    window_end: NaiveDate,
}

impl AvailabilitySnapshot {
    pub fn new(
        blocked_dates: BTreeSet<NaiveDate>,
        window_start: NaiveDate,
        window_end: NaiveDate,
    ) -> Result<Self, SnapshotError> {
        if window_start > window_end {
            return Err(SnapshotError::InvertedWindow {
                start: window_start,
                end: window_end,
            });
        }
        Ok(Self {
            blocked_dates,
            window_start,
            window_end,
        })
    }

    pub fn blocked_dates(&self) -> &BTreeSet<NaiveDate> {
        &self.blocked_dates
    }

    pub fn window_start(&self) -> NaiveDate {
        self.window_start
    }

    pub fn window_end(&self) -> NaiveDate {
        self.window_end
    }

    /// Unblocked dates from `max(window_start, today)` through `window_end`.
    pub fn available_dates(&self, today: NaiveDate) -> BTreeSet<NaiveDate> {
        let from = self.window_start.max(today);
        from.iter_days()
            .take_while(|d| *d <= self.window_end)
            .filter(|d| !self.blocked_dates.contains(d))
            .collect()
    }
}

// ── Widget signature ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    DateInput,
    SelectControl,
    ActionButton,
    CalendarContainer,
}

impl MarkerKind {
    pub const ALL: [MarkerKind; 4] = [
        MarkerKind::DateInput,
        MarkerKind::SelectControl,
        MarkerKind::ActionButton,
        MarkerKind::CalendarContainer,
    ];
}

/// Coarse fingerprint of a page whose booking data could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetSignature {
    pub content_hash: String,
    pub byte_size: usize,
    pub element_counts: BTreeMap<MarkerKind, usize>,
    pub keyword_set: BTreeSet<String>,
    pub strategy: StrategyId,
}

impl WidgetSignature {
    pub fn count(&self, kind: MarkerKind) -> usize {
        self.element_counts.get(&kind).copied().unwrap_or(0)
    }
}

// ── Extraction outcome ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ExtractionResult {
    Structured(AvailabilitySnapshot, StrategyId),
    SignatureOnly(WidgetSignature, StrategyId),
    Failed(String),
}

// ── Raw widget payload ────────────────────────────────────────────────────────

/// Booking-widget fields as they appear in page data, before validation.
/// Values are kept loose because the widget mixes numbers and numeric strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWidgetData {
    pub invalid_checkin_days: Option<serde_json::Value>,
    pub book_from_year: Option<serde_json::Value>,
    pub book_from_month: Option<serde_json::Value>,
    pub book_from_day: Option<serde_json::Value>,
    pub book_until_year: Option<serde_json::Value>,
    pub book_until_month: Option<serde_json::Value>,
    pub book_until_day: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_inverted_window_rejected() {
        let err = AvailabilitySnapshot::new(BTreeSet::new(), d("2025-07-15"), d("2025-07-01"));
        assert!(matches!(err, Err(SnapshotError::InvertedWindow { .. })));
    }

    #[test]
    fn test_available_dates_clamped_to_today() {
        let blocked = [d("2025-07-04")].into_iter().collect();
        let snap = AvailabilitySnapshot::new(blocked, d("2025-07-01"), d("2025-07-05")).unwrap();

        let avail: Vec<_> = snap.available_dates(d("2025-07-03")).into_iter().collect();
        assert_eq!(avail, vec![d("2025-07-03"), d("2025-07-05")]);
    }

    #[test]
    fn test_available_dates_empty_when_window_passed() {
        let snap = AvailabilitySnapshot::new(BTreeSet::new(), d("2025-07-01"), d("2025-07-05")).unwrap();
        assert!(snap.available_dates(d("2025-08-01")).is_empty());
    }
}
