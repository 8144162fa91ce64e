//! SMTP relay adapter
//!
//! Delivery is always best-effort: a relay failure is logged and counted,
//! never propagated to the operation that triggered the mail. With no
//! relay configured the mailer is a no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lettre::message::{Mailbox, MultiPart};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, warn};

use crate::config::EmailSettings;

#[derive(Clone)]
pub struct Mailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    sender: Option<Mailbox>,
    failures: Arc<AtomicU64>,
}

impl Mailer {
    /// Build from settings. Any configuration problem (bad relay URL,
    /// bad sender address) disables email rather than failing startup.
    pub fn from_settings(settings: &EmailSettings) -> Self {
        let disabled = Self {
            transport: None,
            sender: None,
            failures: Arc::new(AtomicU64::new(0)),
        };

        if !settings.is_enabled() {
            info!("email relay not configured; notifications degrade to socket + audit only");
            return disabled;
        }

        let relay_url = settings.relay_url.as_deref().unwrap_or_default();
        let transport = match AsyncSmtpTransport::<Tokio1Executor>::from_url(relay_url) {
            Ok(builder) => builder.build(),
            Err(err) => {
                warn!(error = %err, "invalid SMTP relay URL; email disabled");
                return disabled;
            }
        };

        let sender: Mailbox = match settings.sender.as_deref().unwrap_or_default().parse() {
            Ok(mailbox) => mailbox,
            Err(err) => {
                warn!(error = %err, "invalid sender address; email disabled");
                return disabled;
            }
        };

        Self {
            transport: Some(transport),
            sender: Some(sender),
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Dropped or failed deliveries since startup
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Send one message. Invalid recipient addresses are skipped; an
    /// empty effective To list drops the message quietly.
    pub async fn send(&self, to: &[String], cc: &[String], subject: &str, body: String) {
        let (Some(transport), Some(sender)) = (&self.transport, &self.sender) else {
            return;
        };

        let mut builder = Message::builder().from(sender.clone()).subject(subject);

        let mut recipients = 0;
        for address in to {
            match address.parse::<Mailbox>() {
                Ok(mailbox) => {
                    builder = builder.to(mailbox);
                    recipients += 1;
                }
                Err(err) => warn!(address = %address, error = %err, "skipping bad To address"),
            }
        }
        for address in cc {
            match address.parse::<Mailbox>() {
                Ok(mailbox) => builder = builder.cc(mailbox),
                Err(err) => warn!(address = %address, error = %err, "skipping bad Cc address"),
            }
        }

        if recipients == 0 {
            debug!(subject, "no valid recipients; message dropped");
            return;
        }

        let message = match builder.multipart(MultiPart::alternative_plain_html(
            body.clone(),
            format!("<pre>{body}</pre>"),
        )) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "failed to build email message");
                self.failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        match transport.send(message).await {
            Ok(_) => debug!(subject, to = to.len(), cc = cc.len(), "email dispatched"),
            Err(err) => {
                warn!(subject, error = %err, "email delivery failed");
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_mailer_is_disabled() {
        let mailer = Mailer::from_settings(&EmailSettings {
            relay_url: None,
            sender: None,
        });
        assert!(!mailer.is_enabled());
        assert_eq!(mailer.failure_count(), 0);
    }

    #[test]
    fn test_bad_relay_url_disables_email() {
        let mailer = Mailer::from_settings(&EmailSettings {
            relay_url: Some("::not a url::".to_string()),
            sender: Some("ops@example.com".to_string()),
        });
        assert!(!mailer.is_enabled());
    }

    #[tokio::test]
    async fn test_bad_sender_disables_email() {
        let mailer = Mailer::from_settings(&EmailSettings {
            relay_url: Some("smtp://localhost:2525".to_string()),
            sender: Some("not an address".to_string()),
        });
        assert!(!mailer.is_enabled());
    }

    #[tokio::test]
    async fn test_disabled_mailer_send_is_noop() {
        let mailer = Mailer::from_settings(&EmailSettings {
            relay_url: None,
            sender: None,
        });
        mailer
            .send(
                &["someone@example.com".to_string()],
                &[],
                "subject",
                "body".to_string(),
            )
            .await;
        assert_eq!(mailer.failure_count(), 0);
    }
}
