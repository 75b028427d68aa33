//! Send capabilities for the email and SMS channels.
//!
//! The dispatcher only sees the `EmailSender` and `SmsSender` traits; which
//! transport sits behind them is a deployment choice.

mod disabled;
mod http_sms;
mod sendgrid;
mod smtp;

pub use disabled::DisabledSender;
pub use http_sms::{HttpSmsConfig, HttpSmsProvider};
pub use sendgrid::{SendGridConfig, SendGridProvider};
pub use smtp::{SmtpConfig, SmtpProvider};

use crate::error::NotificationResult;
use async_trait::async_trait;

/// A fully addressed email, ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutgoingEmail {
    pub from_name: String,
    pub from_address: String,
    pub to: String,
    pub reply_to: Option<String>,
    pub subject: String,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
}

impl OutgoingEmail {
    /// Display name for the From header, `None` when blank
    pub fn sender_name(&self) -> Option<&str> {
        Some(self.from_name.trim()).filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutgoingSms {
    pub to: String,
    pub body: String,
}

/// Email send capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> NotificationResult<()>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

/// SMS send capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, sms: &OutgoingSms) -> NotificationResult<()>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_name() {
        let mut email = OutgoingEmail {
            from_name: " Smith, Jane ".into(),
            from_address: "noreply@example.com".into(),
            ..Default::default()
        };
        assert_eq!(email.sender_name(), Some("Smith, Jane"));

        email.from_name = "  ".into();
        assert_eq!(email.sender_name(), None);
    }
}
