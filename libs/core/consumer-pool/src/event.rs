//! Items received from the external queue

use chrono::{DateTime, Utc};

/// One received message: an opaque queue handle plus its decoded event.
///
/// Owned by exactly one worker from receive until delete.
#[derive(Debug, Clone)]
pub struct QueueItem<E> {
    /// Queue-specific receipt used to delete the message
    pub handle: String,

    pub event: E,

    pub received_at: DateTime<Utc>,

    /// True when the queue handed this message out before without a delete
    pub redelivered: bool,
}

impl<E> QueueItem<E> {
    pub fn new(handle: impl Into<String>, event: E) -> Self {
        Self {
            handle: handle.into(),
            event,
            received_at: Utc::now(),
            redelivered: false,
        }
    }

    pub fn redelivered(mut self) -> Self {
        self.redelivered = true;
        self
    }
}
