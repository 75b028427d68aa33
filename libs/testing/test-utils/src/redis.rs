//! Redis container for stream queue tests.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

/// A throwaway Redis 8 server; stopped when dropped.
///
/// ```no_run
/// use test_utils::TestRedis;
///
/// # async fn example() {
/// let redis = TestRedis::new().await;
/// let client = redis.client();
/// // RedisStreamQueue::connect(client, config).await
/// # }
/// ```
pub struct TestRedis {
    _container: ContainerAsync<Redis>,
    url: String,
}

impl TestRedis {
    pub async fn new() -> Self {
        let container = Redis::default()
            .with_tag("8-alpine")
            .start()
            .await
            .expect("Failed to start Redis container");

        let port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis port");
        let url = format!("redis://127.0.0.1:{}", port);

        tracing::info!(port, "Test Redis ready");

        Self {
            _container: container,
            url,
        }
    }

    pub fn connection_string(&self) -> &str {
        &self.url
    }

    pub fn client(&self) -> Client {
        Client::open(self.url.as_str()).expect("Failed to create Redis client")
    }

    pub async fn connection_manager(&self) -> ConnectionManager {
        ConnectionManager::new(self.client())
            .await
            .expect("Failed to connect to Redis")
    }

    /// Entries currently stored in `stream` (acknowledged or not)
    pub async fn stream_len(&self, stream: &str) -> usize {
        let mut conn = self.connection_manager().await;
        conn.xlen(stream).await.expect("XLEN failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "Requires Docker"]
    async fn test_stream_len_counts_entries() {
        let redis = TestRedis::new().await;
        let mut conn = redis.connection_manager().await;

        let _: String = conn
            .xadd("mail:inbound", "*", &[("event", "{}")])
            .await
            .unwrap();

        assert_eq!(redis.stream_len("mail:inbound").await, 1);
        assert_eq!(redis.stream_len("missing").await, 0);
    }
}
