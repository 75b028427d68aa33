//! Process configuration loaded from the environment.

use core_config::{
    ConfigError, FromEnv, env_optional, env_or_default, env_parse_or, env_required,
    server::ServerConfig,
};
use consumer_pool::{PoolConfig, RedisQueueConfig};
use domain_notifications::{DispatcherConfig, SweepConfig};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailProviderKind {
    Smtp,
    SendGrid,
    Disabled,
}

impl FromStr for EmailProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smtp" => Ok(Self::Smtp),
            "sendgrid" => Ok(Self::SendGrid),
            "disabled" | "none" => Ok(Self::Disabled),
            other => Err(format!("unknown email provider '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsProviderKind {
    Http,
    Disabled,
}

impl FromStr for SmsProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "disabled" | "none" => Ok(Self::Disabled),
            other => Err(format!("unknown sms provider '{}'", other)),
        }
    }
}

/// Inbound queue and consumer pool settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    pub stream: String,
    pub group: String,
    pub consumer: Option<String>,
    pub workers: usize,
    pub batch_size: usize,
    pub wait: Duration,
    pub visibility_timeout: Duration,
}

impl QueueSettings {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.stream.clone())
            .with_workers(self.workers)
            .with_max_items(self.batch_size)
            .with_wait(self.wait)
    }

    pub fn redis_config(&self) -> RedisQueueConfig {
        let config = RedisQueueConfig::new(self.stream.clone(), self.group.clone())
            .with_visibility_timeout(self.visibility_timeout);
        match &self.consumer {
            Some(consumer) => config.with_consumer(consumer.clone()),
            None => config,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub queue: QueueSettings,
    pub sweep: SweepConfig,
    /// Six-field cron expression (seconds first)
    pub sweep_cron: String,
    pub email_provider: EmailProviderKind,
    pub sms_provider: SmsProviderKind,
    pub dispatcher: DispatcherConfig,
    pub reply_address: String,
    pub reply_token_secret: String,
    pub reply_token_ttl_days: i64,
    pub server: ServerConfig,
}

fn parse_kind<T: FromStr<Err = String>>(key: &str, default: &str) -> Result<T, ConfigError> {
    env_or_default(key, default)
        .parse()
        .map_err(|details| ConfigError::InvalidValue {
            key: key.to_string(),
            details,
        })
}

fn positive<T: PartialOrd + Default>(key: &str, value: T) -> Result<T, ConfigError> {
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            details: "must be greater than zero".to_string(),
        })
    }
}

impl FromEnv for NotifierConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let queue = QueueSettings {
            stream: env_or_default("QUEUE_STREAM_NAME", "mail:inbound"),
            group: env_or_default("QUEUE_CONSUMER_GROUP", "notifier"),
            consumer: env_optional("QUEUE_CONSUMER_NAME"),
            workers: positive("QUEUE_WORKER_COUNT", env_parse_or("QUEUE_WORKER_COUNT", 1usize)?)?,
            batch_size: positive("QUEUE_BATCH_SIZE", env_parse_or("QUEUE_BATCH_SIZE", 10usize)?)?,
            wait: Duration::from_secs(env_parse_or("QUEUE_WAIT_SECS", 20)?),
            visibility_timeout: Duration::from_secs(env_parse_or("QUEUE_VISIBILITY_TIMEOUT_SECS", 30)?),
        };

        let sweep = SweepConfig {
            batch_size: positive("OUTBOX_BATCH_SIZE", env_parse_or("OUTBOX_BATCH_SIZE", 10u64)?)?,
            claim_attempts: positive(
                "OUTBOX_CLAIM_ATTEMPTS",
                env_parse_or("OUTBOX_CLAIM_ATTEMPTS", 3u32)?,
            )?,
        };

        let dispatcher = DispatcherConfig {
            subject_prefix: env_or_default("EMAIL_SUBJECT_PREFIX", "dev"),
            sender_address: env_or_default("EMAIL_SENDER", "noreply@localhost"),
            sender_name: env_or_default("EMAIL_SENDER_NAME", "Notifications"),
        };

        Ok(Self {
            queue,
            sweep,
            sweep_cron: env_or_default("OUTBOX_SWEEP_CRON", "*/10 * * * * *"),
            email_provider: parse_kind("EMAIL_PROVIDER", "smtp")?,
            sms_provider: parse_kind("SMS_PROVIDER", "disabled")?,
            dispatcher,
            reply_address: env_or_default("EMAIL_REPLY_TO", "reply@localhost"),
            reply_token_secret: env_required("REPLY_TOKEN_SECRET")?,
            reply_token_ttl_days: env_parse_or("REPLY_TOKEN_TTL_DAYS", 90)?,
            server: ServerConfig::from_env()?,
        })
    }
}
