use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
}

/// The property page and the booking widget embedded in it
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    #[serde(default = "default_target_url")]
    pub url: String,

    #[serde(default = "default_property_name")]
    pub property_name: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_booking_token")]
    pub booking_token: String,

    #[serde(default = "default_property_id")]
    pub property_id: String,

    #[serde(default = "default_container_id")]
    pub container_id: String,
}

/// HTTP behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay; doubles on every further attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Polling and change-detection tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    #[serde(default = "default_failure_cooldown_secs")]
    pub failure_cooldown_secs: u64,

    #[serde(default = "default_byte_noise_threshold")]
    pub byte_noise_threshold: usize,

    #[serde(default = "default_min_signal_votes")]
    pub min_signal_votes: usize,
}

/// Mail transport. Every field must be set for mail to be sent.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SmtpConfig {
    pub server: Option<String>,
    pub port: Option<u16>,
    pub from: Option<String>,
    pub password: Option<String>,
    pub to: Option<String>,
}

/// Complete SMTP settings, only obtainable when nothing is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub from: String,
    pub password: String,
    pub to: String,
}

impl SmtpConfig {
    pub fn settings(&self) -> Option<SmtpSettings> {
        Some(SmtpSettings {
            server: non_empty(&self.server)?,
            port: self.port?,
            from: non_empty(&self.from)?,
            password: non_empty(&self.password)?,
            to: non_empty(&self.to)?,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_target_url() -> String {
    "https://www.sartshogavingard.se/bo-ata".to_string()
}
fn default_property_name() -> String {
    "Särtshöga Vingård".to_string()
}
fn default_api_base() -> String {
    "https://secured.sirvoy.com/engine/".to_string()
}
fn default_booking_token() -> String {
    "1420db72-b79c-4756-995a-00ec1fe760bc".to_string()
}
fn default_property_id() -> String {
    "bf788a0e8c2e4631".to_string()
}
fn default_container_id() -> String {
    "sbw_widget_1".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}
fn default_interval_minutes() -> u64 {
    60
}
fn default_failure_cooldown_secs() -> u64 {
    300
}
fn default_byte_noise_threshold() -> usize {
    100
}
fn default_min_signal_votes() -> usize {
    2
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: default_target_url(),
            property_name: default_property_name(),
            api_base: default_api_base(),
            booking_token: default_booking_token(),
            property_id: default_property_id(),
            container_id: default_container_id(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            failure_cooldown_secs: default_failure_cooldown_secs(),
            byte_noise_threshold: default_byte_noise_threshold(),
            min_signal_votes: default_min_signal_votes(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("MONITOR").separator("__"))
            .build()
            .context("Failed to assemble configuration sources")?;

        cfg.try_deserialize()
            .context("Invalid monitor configuration")
    }
}
