//! Redis connection used by the inbound event stream.

use redis::Client;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::error::{DatabaseError, DatabaseResult};
use crate::retry::{RetryConfig, retry_with_backoff};

#[cfg(feature = "config")]
use core_config::{ConfigError, FromEnv, env_or_default};

#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub url: String,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[cfg(feature = "config")]
impl FromEnv for RedisConfig {
    /// `REDIS_URL`, defaulting to a local instance
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(env_or_default("REDIS_URL", "redis://127.0.0.1:6379")))
    }
}

/// Open a `ConnectionManager` and verify it with PING
pub async fn connect(config: &RedisConfig) -> redis::RedisResult<ConnectionManager> {
    let client = Client::open(config.url.as_str())?;
    let mut manager = ConnectionManager::new(client).await?;
    let _: String = redis::cmd("PING").query_async(&mut manager).await?;
    info!("Connected to Redis");
    Ok(manager)
}

/// [`connect`] with startup retry
pub async fn connect_with_retry(
    config: RedisConfig,
    retry: Option<RetryConfig>,
) -> DatabaseResult<ConnectionManager> {
    let retry = retry.unwrap_or_default();
    retry_with_backoff("redis", || connect(&config), &retry)
        .await
        .map_err(|e| DatabaseError::ConnectionFailed(format!("redis: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "config")]
    #[test]
    fn test_redis_config_default_url() {
        temp_env::with_var_unset("REDIS_URL", || {
            let config = RedisConfig::from_env().unwrap();
            assert_eq!(config.url, "redis://127.0.0.1:6379");
        });
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_redis_config_from_env() {
        temp_env::with_var("REDIS_URL", Some("redis://cache:6380/2"), || {
            assert_eq!(RedisConfig::from_env().unwrap().url, "redis://cache:6380/2");
        });
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let result = connect(&RedisConfig::new("not a url")).await;
        assert!(result.is_err());
    }
}
