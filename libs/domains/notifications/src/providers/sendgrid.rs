//! SendGrid email provider implementation.

use super::{EmailSender, OutgoingEmail};
use crate::error::{NotificationError, NotificationResult};
use crate::models::Channel;
use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_or_default, env_required};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// SendGrid API configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendGridConfig {
    pub api_key: String,
    /// API base URL, overridable for tests
    pub api_url: String,
}

impl SendGridConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: "https://api.sendgrid.com/v3".to_string(),
        }
    }
}

impl FromEnv for SendGridConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: env_required("SENDGRID_API_KEY")?,
            api_url: env_or_default("SENDGRID_API_URL", "https://api.sendgrid.com/v3"),
        })
    }
}

/// SendGrid email provider.
pub struct SendGridProvider {
    config: SendGridConfig,
    client: Client,
}

impl SendGridProvider {
    pub fn new(config: SendGridConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

// SendGrid API request/response structures

#[derive(Debug, Serialize)]
struct SendGridRequest {
    personalizations: Vec<Personalization>,
    from: EmailAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<EmailAddress>,
    subject: String,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Personalization {
    to: Vec<EmailAddress>,
}

#[derive(Debug, Serialize)]
struct EmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: String,
}

#[derive(Debug, Deserialize)]
struct SendGridError {
    errors: Vec<SendGridErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct SendGridErrorDetail {
    message: String,
}

impl SendGridRequest {
    fn from_email(email: &OutgoingEmail) -> Self {
        // text/plain must precede text/html
        let mut content = Vec::with_capacity(2);
        if let Some(text) = &email.text_body {
            content.push(Content {
                content_type: "text/plain",
                value: text.clone(),
            });
        }
        if let Some(html) = &email.html_body {
            content.push(Content {
                content_type: "text/html",
                value: html.clone(),
            });
        }

        Self {
            personalizations: vec![Personalization {
                to: vec![EmailAddress {
                    email: email.to.clone(),
                    name: None,
                }],
            }],
            from: EmailAddress {
                email: email.from_address.clone(),
                name: email.sender_name().map(str::to_string),
            },
            reply_to: email.reply_to.as_ref().map(|addr| EmailAddress {
                email: addr.clone(),
                name: None,
            }),
            subject: email.subject.clone(),
            content,
        }
    }
}

fn error_message(body: String) -> String {
    match serde_json::from_str::<SendGridError>(&body) {
        Ok(parsed) => parsed
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>()
            .join(", "),
        Err(_) => body,
    }
}

#[async_trait]
impl EmailSender for SendGridProvider {
    async fn send(&self, email: &OutgoingEmail) -> NotificationResult<()> {
        let request = SendGridRequest::from_email(email);

        debug!(
            to = %email.to,
            subject = %email.subject,
            has_reply_to = email.reply_to.is_some(),
            "Sending email via SendGrid"
        );

        let response = self
            .client
            .post(format!("{}/mail/send", self.config.api_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        error!(to = %email.to, status = %status, error = %body, "Failed to send email via SendGrid");

        Err(NotificationError::send_failure(
            Channel::Email,
            format!("SendGrid error ({}): {}", status, error_message(body)),
        ))
    }

    fn name(&self) -> &'static str {
        "sendgrid"
    }
}
