//! [`ExternalQueue`] over a Redis Streams consumer group.
//!
//! Visibility-timeout semantics come from the group's pending entries list:
//! a received entry stays pending (invisible to `>` reads) until deleted, and
//! entries idle past `visibility_timeout` are reclaimed with XAUTOCLAIM by the
//! next receive on any consumer.
//!
//! Blocking reads run on their own connections, kept idle between polls with
//! at most one per concurrently polling worker. A BLOCKed XREADGROUP on the
//! shared multiplexed connection would stall every other worker's XACK.

use crate::error::{PoolError, PoolResult};
use crate::event::QueueItem;
use crate::queue::ExternalQueue;
use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamAutoClaimReply, StreamId, StreamReadReply};
use redis::{AsyncCommands, Client, RedisResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Stream, group and field naming for a [`RedisStreamQueue`]
#[derive(Debug, Clone)]
pub struct RedisQueueConfig {
    pub stream: String,
    pub group: String,
    /// Unique per process; defaults to `consumer-<uuid>`
    pub consumer: String,
    /// Entry field holding the JSON-encoded event
    pub field: String,
    /// Pending entries idle longer than this are handed out again
    pub visibility_timeout: Duration,
}

impl RedisQueueConfig {
    pub fn new(stream: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
            consumer: format!("consumer-{}", Uuid::new_v4()),
            field: "event".to_string(),
            visibility_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }
}

pub struct RedisStreamQueue<E> {
    client: Client,
    redis: ConnectionManager,
    /// Idle connections for blocking reads
    blocking: Mutex<Vec<MultiplexedConnection>>,
    config: RedisQueueConfig,
    _event: PhantomData<fn() -> E>,
}

impl<E> RedisStreamQueue<E>
where
    E: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create the queue, creating the stream and consumer group if missing
    pub async fn connect(client: Client, config: RedisQueueConfig) -> PoolResult<Self> {
        let redis = ConnectionManager::new(client.clone()).await?;
        let queue = Self {
            client,
            redis,
            blocking: Mutex::new(Vec::new()),
            config,
            _event: PhantomData,
        };
        queue.ensure_group().await?;
        Ok(queue)
    }

    pub fn config(&self) -> &RedisQueueConfig {
        &self.config
    }

    async fn ensure_group(&self) -> PoolResult<()> {
        let mut conn = self.redis.clone();

        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream)
            .arg(&self.config.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                info!(stream = %self.config.stream, group = %self.config.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %self.config.stream, group = %self.config.group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Append an event to the stream; returns the entry id
    pub async fn publish(&self, event: &E) -> PoolResult<String> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(event)?;
        let id: String = conn
            .xadd(&self.config.stream, "*", &[(self.config.field.as_str(), payload)])
            .await?;
        Ok(id)
    }

    /// Pending entries abandoned by crashed or slow consumers
    async fn reclaim(&self, count: usize) -> PoolResult<Vec<StreamId>> {
        let mut conn = self.redis.clone();

        let reply: RedisResult<Option<StreamAutoClaimReply>> = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream)
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg(self.config.visibility_timeout.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await;

        match reply {
            Ok(Some(reply)) => {
                if !reply.claimed.is_empty() {
                    warn!(count = reply.claimed.len(), stream = %self.config.stream, "Reclaimed abandoned entries");
                }
                Ok(reply.claimed)
            }
            Ok(None) => Ok(Vec::new()),
            Err(e) if e.is_timeout() => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// An idle blocking-read connection, or a new one when all are in use
    async fn checkout(&self) -> PoolResult<MultiplexedConnection> {
        if let Some(conn) = self.blocking.lock().await.pop() {
            return Ok(conn);
        }
        debug!(stream = %self.config.stream, "Opening blocking read connection");
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn checkin(&self, conn: MultiplexedConnection) {
        self.blocking.lock().await.push(conn);
    }

    async fn read_new(&self, count: usize, wait: Duration) -> PoolResult<Vec<StreamId>> {
        let mut conn = self.checkout().await?;

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg("COUNT")
            .arg(count);
        if !wait.is_zero() {
            cmd.arg("BLOCK").arg(wait.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(&self.config.stream).arg(">");

        // BLOCK returns nil when the wait elapses with nothing new
        let reply: RedisResult<Option<StreamReadReply>> = cmd.query_async(&mut conn).await;

        // A connection that saw an error is dropped, the next poll opens a fresh one
        match reply {
            Ok(Some(reply)) => {
                self.checkin(conn).await;
                Ok(reply.keys.into_iter().flat_map(|k| k.ids).collect())
            }
            Ok(None) => {
                self.checkin(conn).await;
                Ok(Vec::new())
            }
            // The client's response timeout may be shorter than `wait`
            Err(e) if e.is_timeout() => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn decode(&self, entry: &StreamId) -> PoolResult<E> {
        let raw = match entry.map.get(&self.config.field) {
            Some(redis::Value::BulkString(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
            Some(redis::Value::SimpleString(s)) => s.clone(),
            Some(other) => {
                return Err(PoolError::Decode(format!(
                    "field '{}' has unexpected type: {:?}",
                    self.config.field, other
                )));
            }
            None => {
                return Err(PoolError::Decode(format!(
                    "missing field '{}'",
                    self.config.field
                )));
            }
        };
        Ok(serde_json::from_str(&raw)?)
    }

    async fn remove(&self, id: &str) -> PoolResult<()> {
        let mut conn = self.redis.clone();
        let _: i64 = conn.xack(&self.config.stream, &self.config.group, &[id]).await?;
        let _: i64 = conn.xdel(&self.config.stream, &[id]).await?;
        Ok(())
    }

    /// Turn raw entries into items, discarding ones that can never decode
    async fn decode_entries(&self, entries: Vec<StreamId>, redelivered: bool) -> PoolResult<Vec<QueueItem<E>>> {
        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.decode(&entry) {
                Ok(event) => {
                    let item = QueueItem::new(entry.id, event);
                    items.push(if redelivered { item.redelivered() } else { item });
                }
                Err(e) => {
                    warn!(entry_id = %entry.id, error = %e, "Dropping undecodable entry");
                    self.remove(&entry.id).await?;
                }
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl<E> ExternalQueue<E> for RedisStreamQueue<E>
where
    E: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn receive(&self, max_items: usize, wait: Duration) -> PoolResult<Vec<QueueItem<E>>> {
        let reclaimed = self.reclaim(max_items).await?;
        let mut items = self.decode_entries(reclaimed, true).await?;

        let remaining = max_items.saturating_sub(items.len());
        if remaining > 0 {
            // Do not block when reclaimed work is already waiting
            let wait = if items.is_empty() { wait } else { Duration::ZERO };
            let fresh = self.read_new(remaining, wait).await?;
            items.extend(self.decode_entries(fresh, false).await?);
        }

        Ok(items)
    }

    async fn delete(&self, item: &QueueItem<E>) -> PoolResult<()> {
        self.remove(&item.handle).await?;
        debug!(entry_id = %item.handle, "Deleted entry");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.config.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RedisQueueConfig::new("mail:inbound", "notifier");
        assert_eq!(config.field, "event");
        assert!(config.consumer.starts_with("consumer-"));
        assert_eq!(config.visibility_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_builder() {
        let config = RedisQueueConfig::new("s", "g")
            .with_consumer("host-1")
            .with_visibility_timeout(Duration::from_secs(5));
        assert_eq!(config.consumer, "host-1");
        assert_eq!(config.visibility_timeout, Duration::from_secs(5));
    }
}
