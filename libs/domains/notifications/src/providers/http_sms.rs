//! SMS over a generic JSON HTTP gateway.

use super::{OutgoingSms, SmsSender};
use crate::error::{NotificationError, NotificationResult};
use crate::models::Channel;
use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_optional, env_required};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSmsConfig {
    /// Endpoint that accepts `{from, to, body}`
    pub api_url: String,
    pub api_key: String,
    pub sender_id: Option<String>,
}

impl FromEnv for HttpSmsConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_url: env_required("SMS_API_URL")?,
            api_key: env_required("SMS_API_KEY")?,
            sender_id: env_optional("SMS_SENDER_ID"),
        })
    }
}

#[derive(Debug, Serialize)]
struct SmsRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<&'a str>,
    to: &'a str,
    body: &'a str,
}

pub struct HttpSmsProvider {
    config: HttpSmsConfig,
    client: Client,
}

impl HttpSmsProvider {
    pub fn new(config: HttpSmsConfig) -> NotificationResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl SmsSender for HttpSmsProvider {
    async fn send(&self, sms: &OutgoingSms) -> NotificationResult<()> {
        debug!(to = %sms.to, length = sms.body.len(), "Sending SMS");

        let request = SmsRequest {
            from: self.config.sender_id.as_deref(),
            to: &sms.to,
            body: &sms.body,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| NotificationError::send_failure(Channel::Sms, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        error!(to = %sms.to, status = %status, error = %body, "SMS gateway rejected message");
        Err(NotificationError::send_failure(
            Channel::Sms,
            format!("gateway returned {}: {}", status, body),
        ))
    }

    fn name(&self) -> &'static str {
        "http-sms"
    }
}
