//! Change detection between consecutive polls.
//!
//! ## Modes
//!
//! `Structured`: concrete booking windows are compared; a change means at
//!   least one date became available that was not before.
//!
//! `Signature`: only page fingerprints are known; a change needs several
//!   independent signals to disagree with the baseline, so a single noisy
//!   signal (rotating banner, counter, timestamp) never alerts on its own.
//!
//! The first observation in a mode only establishes the baseline.

pub mod diff;

use crate::config::MonitorConfig;
use crate::models::{AvailabilitySnapshot, MarkerKind, WidgetSignature};
use chrono::{DateTime, Local, NaiveDate};
use std::collections::BTreeSet;
use std::fmt;

use self::diff::newly_available;

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Baseline {
    Snapshot(AvailabilitySnapshot),
    Signature(WidgetSignature),
}

/// Everything the monitor remembers between polls. Lives for the process only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorState {
    baseline: Option<Baseline>,
    poll_count: u64,
}

impl MonitorState {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn baseline_snapshot(&self) -> Option<&AvailabilitySnapshot> {
        match &self.baseline {
            Some(Baseline::Snapshot(s)) => Some(s),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn baseline_signature(&self) -> Option<&WidgetSignature> {
        match &self.baseline {
            Some(Baseline::Signature(s)) => Some(s),
            _ => None,
        }
    }

    pub fn poll_count(&self) -> u64 {
        self.poll_count
    }
}

// ── Observations and reports ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Observation {
    Structured(AvailabilitySnapshot),
    Signature(WidgetSignature),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Signal {
    ContentHash,
    ByteSize,
    ElementCounts,
    Keywords,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ContentHash => "page text",
            Self::ByteSize => "page size",
            Self::ElementCounts => "form/calendar elements",
            Self::Keywords => "availability keywords",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineReason {
    FirstObservation,
    ModeSwitch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDetail {
    Baselined(BaselineReason),
    /// Nothing worth alerting on; lists any signals that moved below the vote threshold.
    Unchanged { signals: Vec<Signal> },
    NewlyAvailable(BTreeSet<NaiveDate>),
    ChangedAsOf { at: DateTime<Local>, signals: Vec<Signal> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeReport {
    pub changed: bool,
    pub detail: ChangeDetail,
}

impl ChangeReport {
    fn quiet(detail: ChangeDetail) -> Self {
        Self {
            changed: false,
            detail,
        }
    }

    fn changed(detail: ChangeDetail) -> Self {
        Self {
            changed: true,
            detail,
        }
    }
}

// ── Detector ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector {
    /// Byte-size differences up to this many bytes are noise.
    pub byte_noise_threshold: usize,
    /// Signals that must disagree before a signature change counts.
    pub min_signal_votes: usize,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for ChangeDetector {
    fn from(cfg: &MonitorConfig) -> Self {
        Self {
            byte_noise_threshold: cfg.byte_noise_threshold,
            min_signal_votes: cfg.min_signal_votes.max(1),
        }
    }
}

impl ChangeDetector {
    /// Signals on which `current` disagrees with `baseline`.
    pub fn disagreeing_signals(&self, baseline: &WidgetSignature, current: &WidgetSignature) -> Vec<Signal> {
        let mut signals = Vec::new();
        if baseline.content_hash != current.content_hash {
            signals.push(Signal::ContentHash);
        }
        if baseline.byte_size.abs_diff(current.byte_size) > self.byte_noise_threshold {
            signals.push(Signal::ByteSize);
        }
        if MarkerKind::ALL.iter().any(|k| baseline.count(*k) != current.count(*k)) {
            signals.push(Signal::ElementCounts);
        }
        if baseline.keyword_set != current.keyword_set {
            signals.push(Signal::Keywords);
        }
        signals
    }

    /// Compare `observation` with the stored baseline and advance the state.
    pub fn observe(&self, state: &mut MonitorState, observation: Observation, now: DateTime<Local>) -> ChangeReport {
        state.poll_count += 1;

        let (baseline, report) = match (state.baseline.take(), observation) {
            (None, obs) => (
                Self::baseline_of(obs),
                ChangeReport::quiet(ChangeDetail::Baselined(BaselineReason::FirstObservation)),
            ),

            (Some(Baseline::Snapshot(previous)), Observation::Structured(current)) => {
                let today = now.date_naive();
                let new_dates = newly_available(&previous.available_dates(today), &current.available_dates(today));
                let report = if new_dates.is_empty() {
                    ChangeReport::quiet(ChangeDetail::Unchanged { signals: vec![] })
                } else {
                    ChangeReport::changed(ChangeDetail::NewlyAvailable(new_dates))
                };
                (Baseline::Snapshot(current), report)
            }

            (Some(Baseline::Signature(previous)), Observation::Signature(current))
                if previous.strategy == current.strategy =>
            {
                let signals = self.disagreeing_signals(&previous, &current);
                let report = if signals.len() >= self.min_signal_votes {
                    ChangeReport::changed(ChangeDetail::ChangedAsOf { at: now, signals })
                } else {
                    ChangeReport::quiet(ChangeDetail::Unchanged { signals })
                };
                (Baseline::Signature(current), report)
            }

            (Some(_), obs) => (
                Self::baseline_of(obs),
                ChangeReport::quiet(ChangeDetail::Baselined(BaselineReason::ModeSwitch)),
            ),
        };

        state.baseline = Some(baseline);
        report
    }

    fn baseline_of(observation: Observation) -> Baseline {
        match observation {
            Observation::Structured(s) => Baseline::Snapshot(s),
            Observation::Signature(s) => Baseline::Signature(s),
        }
    }
}
