use crate::error::PoolResult;
use crate::event::QueueItem;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Immutable per-item context handed to a handler.
///
/// Everything a handler may want for logging or correlation travels here
/// instead of through shared state.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Index of the worker that received the item
    pub worker: usize,
    /// Queue handle of the item being processed
    pub handle: String,
    pub received_at: DateTime<Utc>,
    pub redelivered: bool,
    /// Number of items in the batch this item arrived with
    pub batch_size: usize,
}

impl HandlerContext {
    pub fn for_item<E>(worker: usize, batch_size: usize, item: &QueueItem<E>) -> Self {
        Self {
            worker,
            handle: item.handle.clone(),
            received_at: item.received_at,
            redelivered: item.redelivered,
            batch_size,
        }
    }
}

/// Caller-supplied processing for one decoded event.
///
/// An `Err` is logged and counted; it never causes redelivery because the
/// item is deleted regardless. Handlers that need retries must record their
/// own durable state before returning.
#[async_trait]
pub trait MessageHandler<E>: Send + Sync + 'static
where
    E: Send + Sync + 'static,
{
    async fn handle(&self, ctx: &HandlerContext, event: &E) -> PoolResult<()>;

    /// Handler name for logging and metrics
    fn name(&self) -> &'static str;
}
