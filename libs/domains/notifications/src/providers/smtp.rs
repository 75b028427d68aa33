//! SMTP email provider implementation using lettre.
//!
//! Without TLS this talks to local capture servers such as Mailpit.

use super::{EmailSender, OutgoingEmail};
use crate::error::{NotificationError, NotificationResult};
use crate::models::Channel;
use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_flag, env_optional, env_or_default, env_parse_or};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    Address,
    message::{Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{debug, error};

/// SMTP configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Optional for dev servers like Mailpit
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
}

impl SmtpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            use_tls: false,
        }
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

impl FromEnv for SmtpConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_or_default("SMTP_HOST", "localhost"),
            port: env_parse_or("SMTP_PORT", 1025)?,
            username: env_optional("SMTP_USERNAME"),
            password: env_optional("SMTP_PASSWORD"),
            use_tls: env_flag("SMTP_USE_TLS"),
        })
    }
}

/// SMTP email provider.
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: SmtpConfig,
}

impl SmtpProvider {
    pub fn new(config: SmtpConfig) -> NotificationResult<Self> {
        let transport = Self::build_transport(&config)?;
        Ok(Self { transport, config })
    }

    fn build_transport(config: &SmtpConfig) -> NotificationResult<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| NotificationError::Provider(format!("Failed to create SMTP relay: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        }
        .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }
}

fn address(raw: &str, what: &str) -> NotificationResult<Address> {
    raw.trim()
        .parse()
        .map_err(|e| NotificationError::send_failure(Channel::Email, format!("invalid {} address '{}': {}", what, raw, e)))
}

/// The display name is set on the mailbox directly, so commas and quotes in it
/// never reach the address parser.
fn mailbox(name: Option<&str>, raw: &str, what: &str) -> NotificationResult<Mailbox> {
    Ok(Mailbox::new(name.map(str::to_string), address(raw, what)?))
}

/// Build a lettre Message, multipart when both bodies are present.
pub(crate) fn build_message(email: &OutgoingEmail) -> NotificationResult<Message> {
    let mut builder = Message::builder()
        .from(mailbox(email.sender_name(), &email.from_address, "from")?)
        .to(mailbox(None, &email.to, "to")?)
        .subject(email.subject.as_str());

    if let Some(reply_to) = &email.reply_to {
        builder = builder.reply_to(mailbox(None, reply_to, "reply-to")?);
    }

    let text = SinglePart::builder().header(ContentType::TEXT_PLAIN);
    let html = SinglePart::builder().header(ContentType::TEXT_HTML);

    let message = match (&email.text_body, &email.html_body) {
        (Some(t), Some(h)) => builder.multipart(
            MultiPart::alternative()
                .singlepart(text.body(t.clone()))
                .singlepart(html.body(h.clone())),
        ),
        (None, Some(h)) => builder.singlepart(html.body(h.clone())),
        (Some(t), None) => builder.singlepart(text.body(t.clone())),
        (None, None) => builder.singlepart(text.body(String::new())),
    };

    message.map_err(|e| NotificationError::send_failure(Channel::Email, format!("failed to build message: {}", e)))
}

#[async_trait]
impl EmailSender for SmtpProvider {
    async fn send(&self, email: &OutgoingEmail) -> NotificationResult<()> {
        debug!(
            to = %email.to,
            subject = %email.subject,
            host = %self.config.host,
            port = self.config.port,
            has_reply_to = email.reply_to.is_some(),
            "Sending email via SMTP"
        );

        let message = build_message(email)?;

        self.transport.send(message).await.map_err(|e| {
            error!(to = %email.to, error = %e, "Failed to send email via SMTP");
            NotificationError::send_failure(Channel::Email, format!("SMTP send failed: {}", e))
        })?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            from_name: "Bookings".into(),
            from_address: "noreply@example.com".into(),
            to: "client@example.com".into(),
            reply_to: Some("reply+abc@example.com".into()),
            subject: "dev: Booking confirmed".into(),
            html_body: Some("<p>See you</p>".into()),
            text_body: Some("See you".into()),
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        temp_env::with_vars_unset(
            ["SMTP_HOST", "SMTP_PORT", "SMTP_USERNAME", "SMTP_PASSWORD", "SMTP_USE_TLS"],
            || {
                let config = SmtpConfig::from_env().unwrap();
                assert_eq!(config, SmtpConfig::new("localhost", 1025));
            },
        );
    }

    #[test]
    fn test_config_from_env_with_tls() {
        temp_env::with_vars(
            [
                ("SMTP_HOST", Some("smtp.example.com")),
                ("SMTP_PORT", Some("587")),
                ("SMTP_USERNAME", Some("user")),
                ("SMTP_PASSWORD", Some("pass")),
                ("SMTP_USE_TLS", Some("true")),
            ],
            || {
                let config = SmtpConfig::from_env().unwrap();
                assert_eq!(
                    config,
                    SmtpConfig::new("smtp.example.com", 587)
                        .with_tls(true)
                        .with_credentials("user", "pass")
                );
            },
        );
    }

    #[test]
    fn test_config_rejects_bad_port() {
        temp_env::with_var("SMTP_PORT", Some("smtp"), || {
            assert!(SmtpConfig::from_env().is_err());
        });
    }

    #[test]
    fn test_build_message_headers() {
        let message = build_message(&email()).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Bookings"));
        assert!(raw.contains("<noreply@example.com>"));
        assert!(raw.contains("reply+abc@example.com"));
        assert!(raw.contains("Subject: dev: Booking confirmed"));
        assert!(raw.contains("multipart/alternative"));
    }

    #[test]
    fn test_build_message_keeps_comma_in_sender_name() {
        let mut named = email();
        named.from_name = "Smith, Jane".into();
        let raw = build_message(&named).unwrap().formatted();

        let parsed = mail_parser::MessageParser::default().parse(&raw).unwrap();
        let from = parsed.from().and_then(|a| a.first()).unwrap();
        assert_eq!(from.name(), Some("Smith, Jane"));
        assert_eq!(from.address(), Some("noreply@example.com"));
    }

    #[test]
    fn test_build_message_without_sender_name() {
        let mut bare = email();
        bare.from_name.clear();
        let message = build_message(&bare).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("From: noreply@example.com"));
    }

    #[test]
    fn test_build_message_rejects_bad_recipient() {
        let mut bad = email();
        bad.to = "nobody".into();
        let err = build_message(&bad).unwrap_err();
        assert!(matches!(err, NotificationError::SendFailure { channel: Channel::Email, .. }));
    }
}
