//! Notification delivery.
//!
//! The pipeline only sees the [`Notifier`] trait. Mail goes out over SMTP when
//! every transport setting is configured; otherwise notifications are logged.

use crate::config::SmtpSettings;
use crate::error::NotifyError;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError>;
}

// ── Log-only ──────────────────────────────────────────────────────────────────

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        info!("🔔 {}", subject);
        info!("📋 {}", body);
        Ok(())
    }
}

// ── SMTP ──────────────────────────────────────────────────────────────────────

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    settings: SmtpSettings,
}

impl SmtpNotifier {
    pub fn new(settings: SmtpSettings) -> Result<Self, NotifyError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.server)?
            .port(settings.port)
            .credentials(Credentials::new(settings.from.clone(), settings.password.clone()))
            .build();
        Ok(Self { transport, settings })
    }

    fn message(&self, subject: &str, body: &str) -> Result<Message, NotifyError> {
        Ok(Message::builder()
            .from(self.settings.from.parse()?)
            .to(self.settings.to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?)
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        LogNotifier.notify(subject, body).await?;

        let message = self.message(subject, body)?;
        self.transport.send(message).await?;
        info!("📧 Mail sent to {}", self.settings.to);
        Ok(())
    }
}

/// SMTP when fully configured, log-only otherwise.
pub fn from_settings(settings: Option<SmtpSettings>) -> Result<Box<dyn Notifier>, NotifyError> {
    match settings {
        Some(s) => Ok(Box::new(SmtpNotifier::new(s)?)),
        None => Ok(Box::new(LogNotifier)),
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every notification; optionally fails delivery.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(String, String)>>,
        pub fail: bool,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string()));
            if self.fail {
                let bad: Result<lettre::Address, _> = "not an address".parse();
                return Err(NotifyError::Address(bad.unwrap_err()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            server: "smtp.example.com".into(),
            port: 587,
            from: "monitor@example.com".into(),
            password: "secret".into(),
            to: "Guest <guest@example.com>".into(),
        }
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        tokio_test::assert_ok!(LogNotifier.notify("subject", "body").await);
    }

    #[tokio::test]
    async fn test_message_carries_subject_and_recipient() {
        let notifier = SmtpNotifier::new(settings()).unwrap();
        let message = notifier.message("🍇 Nya rum", "Hej!").unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("guest@example.com"));
        assert!(raw.contains("Subject:"));
    }

    #[tokio::test]
    async fn test_bad_recipient_is_notify_error() {
        let mut s = settings();
        s.to = "nobody".into();
        let notifier = SmtpNotifier::new(s).unwrap();
        assert!(matches!(notifier.message("s", "b"), Err(NotifyError::Address(_))));
    }
}
