//! Email messages and the transports that deliver them.

use dagline_core::CoreError;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Notification delivery failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    /// Sender or recipient cannot be parsed
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress {
        /// Raw address
        address: String,
        /// Parser message
        reason: String,
    },
    /// Message could not be assembled
    #[error("failed to build message: {0}")]
    Build(String),
    /// SMTP exchange failed
    #[error("transport error: {0}")]
    Transport(String),
    /// Notifier refused to send
    #[error("notifier unavailable: {0}")]
    Unavailable(String),
}

impl From<NotifyError> for CoreError {
    fn from(err: NotifyError) -> Self {
        CoreError::Notification {
            reason: err.to_string(),
        }
    }
}

/// An HTML email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// HTML body
    pub html_body: String,
}

impl EmailMessage {
    /// Create a message
    #[must_use]
    pub fn new(to: impl Into<String>, subject: impl Into<String>, html_body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            html_body: html_body.into(),
        }
    }
}

/// Something that can deliver an [`EmailMessage`]
pub trait Notifier: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Deliver one message
    ///
    /// # Errors
    ///
    /// Returns error if the message cannot be delivered
    fn send(&self, message: &EmailMessage) -> Result<(), NotifyError>;
}

/// SMTP relay settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// Relay host
    pub host: String,
    /// Relay port
    pub port: u16,
    /// Login user, if the relay needs one
    pub username: Option<String>,
    /// Login password
    pub password: Option<String>,
    /// Sender address
    pub from: String,
    /// Upgrade the connection with STARTTLS
    pub starttls: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 587,
            username: None,
            password: None,
            from: "dagline@localhost".to_string(),
            starttls: true,
        }
    }
}

/// Sends mail through an SMTP relay
pub struct SmtpNotifier {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpNotifier {
    /// Build the transport; no connection is made until the first send
    ///
    /// # Errors
    ///
    /// Returns error if the sender address or relay settings are invalid
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let from = parse_mailbox(&config.from)?;

        let builder = if config.starttls {
            SmtpTransport::starttls_relay(&config.host)
                .map_err(|e| NotifyError::Transport(format!("relay {}: {}", config.host, e)))?
        } else {
            SmtpTransport::builder_dangerous(&config.host)
        };
        let mut builder = builder.port(config.port);

        if let Some(username) = &config.username {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    /// Assemble the MIME message
    ///
    /// # Errors
    ///
    /// Returns error if the recipient is invalid
    pub fn build_message(&self, message: &EmailMessage) -> Result<Message, NotifyError> {
        Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(&message.to)?)
            .subject(message.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(message.html_body.clone())
            .map_err(|e| NotifyError::Build(e.to_string()))
    }
}

impl Notifier for SmtpNotifier {
    fn name(&self) -> &str {
        "smtp"
    }

    fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        let email = self.build_message(message)?;
        let response = self
            .transport
            .send(&email)
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        info!(to = %message.to, subject = %message.subject, code = %response.code(), "email sent");
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|e: lettre::address::AddressError| NotifyError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// Writes messages to the log instead of sending them
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        info!(to = %message.to, subject = %message.subject, body = %message.html_body, "email (not sent)");
        Ok(())
    }
}

/// Keeps every message in memory; can be switched to fail
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<EmailMessage>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    /// Create a shareable recorder
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make subsequent sends fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages accepted so far
    #[must_use]
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Unavailable("recording notifier set to fail".to_string()));
        }
        self.sent
            .lock()
            .map_err(|_| NotifyError::Unavailable("recorder lock poisoned".to_string()))?
            .push(message.clone());
        Ok(())
    }
}
