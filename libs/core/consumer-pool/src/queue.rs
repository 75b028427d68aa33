use crate::error::PoolResult;
use crate::event::QueueItem;
use async_trait::async_trait;
use std::time::Duration;

/// A managed at-least-once queue the pool drains.
///
/// Implementations must hide a received item from other consumers until it
/// is deleted or its visibility window lapses.
#[async_trait]
pub trait ExternalQueue<E>: Send + Sync + 'static
where
    E: Send + Sync + 'static,
{
    /// Wait up to `wait` for between 0 and `max_items` items
    async fn receive(&self, max_items: usize, wait: Duration) -> PoolResult<Vec<QueueItem<E>>>;

    /// Permanently remove a received item
    async fn delete(&self, item: &QueueItem<E>) -> PoolResult<()>;

    /// Queue name for logging and metrics
    fn name(&self) -> &str;
}
