//! Poll orchestrator: fetcher → extractor → detector → notifier.
//!
//! ## Run modes
//!
//! `poll_cycle()`: one check (cron / external scheduler use):
//!   1. Fetch the property page (retries inside the fetcher)
//!   2. Extract booking data, or fall back to a page signature
//!   3. Compare with the baseline held in `MonitorState`
//!   4. Notify at most once, never on the baselining poll
//!   A failed fetch leaves the state untouched.
//!
//! `run_until()`: continuous mode: poll, sleep `interval_minutes`, repeat until
//!   the shutdown future resolves. A panicking cycle is logged and followed by
//!   the longer failure cooldown instead of ending the process.

use crate::config::{AppConfig, MonitorConfig, TargetConfig};
use crate::detector::{ChangeDetail, ChangeDetector, ChangeReport, MonitorState, Observation};
use crate::error::MonitorError;
use crate::models::{ExtractionResult, StrategyId};
use crate::notifier::{self, Notifier};
use crate::scraper::http_client::HttpClient;
use crate::scraper::{PageFetcher, StructuredExtractor};
use crate::utils::Timer;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

// ── Clock ─────────────────────────────────────────────────────────────────────

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

// ── Monitor ───────────────────────────────────────────────────────────────────

pub struct Monitor {
    target: TargetConfig,
    schedule: MonitorConfig,
    fetcher: Arc<dyn PageFetcher>,
    extractor: StructuredExtractor,
    detector: ChangeDetector,
    notifier: Box<dyn Notifier>,
    clock: Box<dyn Clock>,
}

/// What a single poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// `None` when the page gave nothing to compare.
    pub strategy: Option<StrategyId>,
    pub change: Option<ChangeReport>,
    pub notified: bool,
}

impl Monitor {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let fetcher: Arc<dyn PageFetcher> =
            Arc::new(HttpClient::new(&config.scraper).context("Failed to build HTTP client")?);

        let smtp = config.smtp.settings();
        if smtp.is_none() {
            warn!("SMTP configuration incomplete - notifications are log-only");
        }
        let notifier = notifier::from_settings(smtp).context("Failed to set up mail transport")?;

        Ok(Self::from_parts(config, fetcher, notifier, Box::new(SystemClock)))
    }

    pub fn from_parts(
        config: &AppConfig,
        fetcher: Arc<dyn PageFetcher>,
        notifier: Box<dyn Notifier>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            target: config.target.clone(),
            schedule: config.monitor.clone(),
            extractor: StructuredExtractor::standard(fetcher.clone(), &config.target),
            fetcher,
            detector: ChangeDetector::from(&config.monitor),
            notifier,
            clock,
        }
    }

    pub fn extractor(&self) -> &StructuredExtractor {
        &self.extractor
    }

    pub fn fetcher(&self) -> &dyn PageFetcher {
        self.fetcher.as_ref()
    }

    pub async fn poll_cycle(&self, state: &mut MonitorState) -> Result<CycleReport, MonitorError> {
        let _t = Timer::start(format!("Check #{}", state.poll_count() + 1));

        let doc = self.fetcher.get(&self.target.url).await?;
        info!("📄 Page loaded, {} bytes", doc.body.len());

        let now = self.clock.now();
        let (observation, strategy) = match self.extractor.extract(&doc).await {
            ExtractionResult::Structured(snapshot, id) => {
                let available = snapshot.available_dates(now.date_naive());
                info!(
                    "📊 {} available days, {} blocked ({} → {})",
                    available.len(),
                    snapshot.blocked_dates().len(),
                    snapshot.window_start(),
                    snapshot.window_end(),
                );
                (Observation::Structured(snapshot), id)
            }
            ExtractionResult::SignatureOnly(signature, id) => {
                info!(
                    "🔍 Page signature: {} bytes, keywords {:?}",
                    signature.byte_size, signature.keyword_set
                );
                (Observation::Signature(signature), id)
            }
            ExtractionResult::Failed(reason) => {
                warn!("Nothing to compare this cycle: {}", reason);
                return Ok(CycleReport {
                    strategy: None,
                    change: None,
                    notified: false,
                });
            }
        };

        let change = self.detector.observe(state, observation, now);
        let notified = if change.changed {
            self.send(&change, state.poll_count(), now).await
        } else {
            log_quiet(&change.detail);
            false
        };

        Ok(CycleReport {
            strategy: Some(strategy),
            change: Some(change),
            notified,
        })
    }

    /// Delivery failures are logged and never fail the cycle.
    async fn send(&self, change: &ChangeReport, poll_count: u64, now: DateTime<Local>) -> bool {
        let Some((subject, body)) = compose(&self.target, &change.detail, poll_count, now) else {
            return false;
        };
        if let ChangeDetail::NewlyAvailable(dates) = &change.detail {
            let listed: Vec<String> = dates.iter().map(|d| d.to_string()).collect();
            info!("🎉 New available dates: {}", listed.join(", "));
        }
        match self.notifier.notify(&subject, &body).await {
            Ok(()) => true,
            Err(e) => {
                error!("❌ Notification failed: {}", e);
                false
            }
        }
    }

    /// A cycle whose panics are turned into errors.
    pub async fn guarded_cycle(&self, state: &mut MonitorState) -> Result<CycleReport, MonitorError> {
        match AssertUnwindSafe(self.poll_cycle(state)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(MonitorError::Panicked(message))
            }
        }
    }

    pub async fn run_until<F>(&self, state: &mut MonitorState, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let interval = Duration::from_secs(self.schedule.interval_minutes * 60);
        let cooldown = Duration::from_secs(self.schedule.failure_cooldown_secs);
        info!(
            "🚀 Monitoring {} every {} min",
            self.target.url, self.schedule.interval_minutes
        );

        tokio::pin!(shutdown);
        loop {
            let pause = match self.guarded_cycle(state).await {
                Ok(_) => interval,
                Err(MonitorError::Fetch(e)) => {
                    error!("❌ Check #{} failed: {:#}", state.poll_count() + 1, anyhow::Error::new(e));
                    interval
                }
                Err(e) => {
                    error!("❌ Unexpected error: {}; retrying in {:?}", e, cooldown);
                    cooldown
                }
            };

            tokio::select! {
                _ = &mut shutdown => {
                    info!("⏹️ Monitoring stopped");
                    break;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

fn log_quiet(detail: &ChangeDetail) {
    match detail {
        ChangeDetail::Baselined(reason) => info!("Baseline established ({:?})", reason),
        ChangeDetail::Unchanged { signals } if signals.is_empty() => info!("No change"),
        ChangeDetail::Unchanged { signals } => {
            info!("No change (below threshold: {:?})", signals)
        }
        _ => {}
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// Subject and body for a change; `None` for details that never notify.
pub fn compose(
    target: &TargetConfig,
    detail: &ChangeDetail,
    poll_count: u64,
    now: DateTime<Local>,
) -> Option<(String, String)> {
    let (subject, summary) = match detail {
        ChangeDetail::NewlyAvailable(dates) => {
            let listed: Vec<String> = dates.iter().map(|d| format!("📅 {d}")).collect();
            (
                format!("🍇 New rooms available at {}!", target.property_name),
                format!("Newly available check-in dates:\n{}", listed.join("\n")),
            )
        }
        ChangeDetail::ChangedAsOf { at, signals } => {
            let signals: Vec<String> = signals.iter().map(|s| s.to_string()).collect();
            (
                format!("🍇 Booking calendar changed at {}", target.property_name),
                format!(
                    "The booking page changed as of {} ({}).\nExact dates could not be read; check the calendar.",
                    at.format("%Y-%m-%d %H:%M:%S"),
                    signals.join(", ")
                ),
            )
        }
        ChangeDetail::Baselined(_) | ChangeDetail::Unchanged { .. } => return None,
    };

    let body = format!(
        "Hi!\n\n{summary}\n\n🔗 Book here: {url}\n\n⏰ Checked: {checked}\n📊 Total checks: {poll_count}\n",
        url = target.url,
        checked = now.format("%Y-%m-%d %H:%M:%S"),
    );
    Some((subject, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AvailabilitySnapshot;
    use crate::notifier::testing::RecordingNotifier;
    use crate::scraper::testing::{ScriptedFetcher, page_with_embedded};
    use chrono::{NaiveDate, TimeZone};
    use std::collections::BTreeSet;

    struct FixedClock(DateTime<Local>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Local> {
            self.0
        }
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn june_20() -> DateTime<Local> {
        Local
            .from_local_datetime(&d("2025-06-20").and_hms_opt(9, 0, 0).unwrap())
            .single()
            .unwrap()
    }

    fn config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.target.url = "https://property.test/bo".into();
        cfg.target.api_base = "https://engine.test/".into();
        cfg
    }

    fn monitor(fetcher: Arc<ScriptedFetcher>, notifier: Arc<RecordingNotifier>) -> Monitor {
        struct Shared(Arc<RecordingNotifier>);

        #[async_trait::async_trait]
        impl Notifier for Shared {
            async fn notify(&self, subject: &str, body: &str) -> Result<(), crate::error::NotifyError> {
                self.0.notify(subject, body).await
            }
        }

        Monitor::from_parts(&config(), fetcher, Box::new(Shared(notifier)), Box::new(FixedClock(june_20())))
    }

    fn july(blocked: &[&str]) -> String {
        let blocked: BTreeSet<_> = blocked.iter().map(|s| d(s)).collect();
        page_with_embedded(&AvailabilitySnapshot::new(blocked, d("2025-07-01"), d("2025-07-15")).unwrap())
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_state_untouched() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.fail("https://property.test/bo");
        let notifier = Arc::new(RecordingNotifier::default());
        let monitor = monitor(fetcher, notifier.clone());

        let mut state = MonitorState::new();
        let result = monitor.poll_cycle(&mut state).await;

        match result {
            Err(MonitorError::Fetch(e)) => assert_eq!(e.attempts, 3),
            other => panic!("expected fetch error, got {other:?}"),
        }
        assert_eq!(state, MonitorState::new());
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_structured_scenario_reports_freed_date() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.respond("https://property.test/bo", &july(&["2025-07-10"]));
        fetcher.respond("https://property.test/bo", &july(&[]));
        let notifier = Arc::new(RecordingNotifier::default());
        let monitor = monitor(fetcher, notifier.clone());
        let mut state = MonitorState::new();

        let first = monitor.poll_cycle(&mut state).await.unwrap();
        assert_eq!(first.strategy, Some(StrategyId::EmbeddedAttribute));
        assert!(!first.notified);

        let second = monitor.poll_cycle(&mut state).await.unwrap();
        let expected: BTreeSet<_> = [d("2025-07-10")].into_iter().collect();
        assert_eq!(second.change.unwrap().detail, ChangeDetail::NewlyAvailable(expected));
        assert!(second.notified);

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("New rooms available"));
        assert!(sent[0].1.contains("📅 2025-07-10"));
        assert!(!sent[0].1.contains("2025-07-09"));
        assert!(sent[0].1.contains("Total checks: 2"));
    }

    #[tokio::test]
    async fn test_signature_scenario() {
        let page_a = "<html><body><h1>Bo &amp; Äta</h1><p>Boka ditt rum</p><div class=\"calendar\"></div></body></html>";
        let page_b = "<html><body><h1>Bo &amp; Äta</h1><p>Fullbokat i sommar</p><div class=\"calendar\"></div></body></html>";

        let fetcher = Arc::new(ScriptedFetcher::default());
        for page in [page_a, page_a, page_b] {
            fetcher.respond("https://property.test/bo", page);
        }
        let notifier = Arc::new(RecordingNotifier::default());
        let monitor = monitor(fetcher, notifier.clone());
        let mut state = MonitorState::new();

        let first = monitor.poll_cycle(&mut state).await.unwrap();
        assert_eq!(first.strategy, Some(StrategyId::PageSignature));
        assert!(!first.notified);

        let second = monitor.poll_cycle(&mut state).await.unwrap();
        assert!(!second.change.unwrap().changed);
        assert!(notifier.sent().is_empty());

        let third = monitor.poll_cycle(&mut state).await.unwrap();
        assert!(matches!(
            third.change.unwrap().detail,
            ChangeDetail::ChangedAsOf { at, .. } if at == june_20()
        ));
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("changed as of 2025-06-20 09:00:00"));
        assert_eq!(state.poll_count(), 3);
    }

    #[tokio::test]
    async fn test_notify_failure_does_not_fail_cycle() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.respond("https://property.test/bo", &july(&["2025-07-10"]));
        fetcher.respond("https://property.test/bo", &july(&[]));
        let notifier = Arc::new(RecordingNotifier::failing());
        let monitor = monitor(fetcher, notifier.clone());
        let mut state = MonitorState::new();

        monitor.poll_cycle(&mut state).await.unwrap();
        let second = monitor.poll_cycle(&mut state).await.unwrap();

        assert!(second.change.unwrap().changed);
        assert!(!second.notified);
        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(state.poll_count(), 2);
        assert!(state.baseline_snapshot().unwrap().blocked_dates().is_empty());
    }

    #[tokio::test]
    async fn test_blank_page_is_noop() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.respond("https://property.test/bo", "   ");
        let monitor = monitor(fetcher, Arc::new(RecordingNotifier::default()));
        let mut state = MonitorState::new();

        let report = monitor.poll_cycle(&mut state).await.unwrap();
        assert_eq!(report.strategy, None);
        assert_eq!(state, MonitorState::new());
    }

    #[tokio::test]
    async fn test_panicking_cycle_is_contained() {
        struct Exploding;

        #[async_trait::async_trait]
        impl PageFetcher for Exploding {
            async fn fetch(
                &self,
                _url: &str,
                _params: &[(&str, &str)],
                _headers: &[(&str, &str)],
            ) -> Result<crate::models::Document, crate::error::FetchError> {
                panic!("parser blew up")
            }
        }

        let monitor = Monitor::from_parts(
            &config(),
            Arc::new(Exploding),
            Box::new(RecordingNotifier::default()),
            Box::new(FixedClock(june_20())),
        );
        let mut state = MonitorState::new();
        match monitor.guarded_cycle(&mut state).await {
            Err(MonitorError::Panicked(msg)) => assert_eq!(msg, "parser blew up"),
            other => panic!("expected contained panic, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_until_stops_on_shutdown() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.respond("https://property.test/bo", &july(&[]));
        let monitor = monitor(fetcher, Arc::new(RecordingNotifier::default()));
        let mut state = MonitorState::new();

        monitor
            .run_until(&mut state, tokio::time::sleep(Duration::from_millis(50)))
            .await;
        assert_eq!(state.poll_count(), 1);
    }

    #[test]
    fn test_quiet_details_compose_nothing() {
        let target = TargetConfig::default();
        let quiet = ChangeDetail::Unchanged { signals: vec![] };
        assert!(compose(&target, &quiet, 4, june_20()).is_none());
    }
}
