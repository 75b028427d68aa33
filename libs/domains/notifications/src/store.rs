use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{NotificationError, NotificationResult};
use crate::models::{Channel, ChannelState, NewNotification, NotificationRecord};

/// Persistence for outbox records.
///
/// All channel state changes go through this trait. Implementations must make
/// `claim_batch` atomic: either every selected record has its pending channels
/// flipped to claimed, or none do.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert a new record with every present channel pending
    async fn enqueue(&self, notification: NewNotification) -> NotificationResult<NotificationRecord>;

    /// Claim up to `limit` records in creation order
    async fn claim_batch(&self, limit: u64) -> NotificationResult<Vec<NotificationRecord>>;

    /// Claimed to done. Already done is a no-op.
    async fn mark_channel_done(&self, id: Uuid, channel: Channel) -> NotificationResult<()>;

    async fn get(&self, id: Uuid) -> NotificationResult<Option<NotificationRecord>>;

    /// Claimed back to pending, for operator retries
    async fn requeue_channel(&self, id: Uuid, channel: Channel) -> NotificationResult<()>;

    /// Move every channel claimed before `older_than` back to pending.
    /// Returns the number of records touched.
    async fn requeue_stale(&self, older_than: DateTime<Utc>) -> NotificationResult<u64>;

    async fn soft_delete(&self, id: Uuid) -> NotificationResult<()>;
}

/// Explains why a transition was refused, given the record as it is now.
pub(crate) fn transition_error(
    record: &NotificationRecord,
    channel: Channel,
    wanted: &str,
) -> NotificationError {
    NotificationError::InvalidTransition(format!(
        "cannot {} {} channel of {} while it is {}",
        wanted,
        channel,
        record.id,
        record.channel(channel).status()
    ))
}

/// Fault to inject into the next claim of an [`InMemoryOutboxStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimFault {
    /// Persistence failure after selection, before the flips are committed
    BeforeCommit,
    /// One fewer row reported as updated than was selected
    RowCountMismatch,
}

/// In-memory implementation of OutboxStore (for development/testing)
#[derive(Debug, Default, Clone)]
pub struct InMemoryOutboxStore {
    records: Arc<RwLock<HashMap<Uuid, NotificationRecord>>>,
    fault: Arc<Mutex<Option<ClaimFault>>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `claim_batch` fail the given way. Consumed on use.
    pub fn fail_next_claim(&self, fault: ClaimFault) {
        if let Ok(mut slot) = self.fault.lock() {
            *slot = Some(fault);
        }
    }

    /// Insert a record as-is, bypassing validation
    pub async fn insert(&self, record: NotificationRecord) {
        self.records.write().await.insert(record.id, record);
    }

    pub async fn all(&self) -> Vec<NotificationRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        records
    }

    fn take_fault(&self) -> Option<ClaimFault> {
        self.fault.lock().ok().and_then(|mut slot| slot.take())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(&self, notification: NewNotification) -> NotificationResult<NotificationRecord> {
        let record = notification.into_record(Utc::now())?;
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(NotificationError::Persistence(format!(
                "insert affected 0 rows for {}",
                record.id
            )));
        }
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn claim_batch(&self, limit: u64) -> NotificationResult<Vec<NotificationRecord>> {
        // The write lock spans select and flip, like a serializable transaction
        let mut records = self.records.write().await;

        let mut candidates: Vec<&NotificationRecord> =
            records.values().filter(|r| r.is_claimable()).collect();
        candidates.sort_by_key(|r| (r.created_at, r.id));
        let selected: Vec<Uuid> = candidates
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|r| r.id)
            .collect();

        // Stage the flips; nothing is visible until every one succeeded
        let now = Utc::now();
        let mut staged = Vec::with_capacity(selected.len());
        for id in &selected {
            if let Some(mut record) = records.get(id).cloned() {
                if record.claim(now) {
                    staged.push(record);
                }
            }
        }

        match self.take_fault() {
            Some(ClaimFault::BeforeCommit) => {
                return Err(NotificationError::Persistence(
                    "connection lost before commit".into(),
                ));
            }
            Some(ClaimFault::RowCountMismatch) => {
                return Err(NotificationError::ClaimInconsistency {
                    expected: selected.len() as u64,
                    actual: staged.len().saturating_sub(1) as u64,
                });
            }
            None => {}
        }

        if staged.len() != selected.len() {
            return Err(NotificationError::ClaimInconsistency {
                expected: selected.len() as u64,
                actual: staged.len() as u64,
            });
        }

        for record in &staged {
            records.insert(record.id, record.clone());
        }
        Ok(staged)
    }

    async fn mark_channel_done(&self, id: Uuid, channel: Channel) -> NotificationResult<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(NotificationError::NotFound(id))?;

        match *record.channel(channel) {
            ChannelState::Claimed { claimed_at } => {
                *record.channel_mut(channel) = ChannelState::Done {
                    claimed_at,
                    completed_at: Utc::now(),
                };
                Ok(())
            }
            ChannelState::Done { .. } => Ok(()),
            _ => Err(transition_error(record, channel, "complete")),
        }
    }

    async fn get(&self, id: Uuid) -> NotificationResult<Option<NotificationRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn requeue_channel(&self, id: Uuid, channel: Channel) -> NotificationResult<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(NotificationError::NotFound(id))?;

        if !record.channel(channel).is_claimed() {
            return Err(transition_error(record, channel, "requeue"));
        }
        *record.channel_mut(channel) = ChannelState::Pending;
        Ok(())
    }

    async fn requeue_stale(&self, older_than: DateTime<Utc>) -> NotificationResult<u64> {
        let mut records = self.records.write().await;
        let mut touched = 0;

        for record in records.values_mut().filter(|r| !r.deleted) {
            let mut changed = false;
            for channel in Channel::ALL {
                let state = record.channel_mut(channel);
                if let ChannelState::Claimed { claimed_at } = *state {
                    if claimed_at < older_than {
                        *state = ChannelState::Pending;
                        changed = true;
                    }
                }
            }
            if changed {
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn soft_delete(&self, id: Uuid) -> NotificationResult<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(NotificationError::NotFound(id))?;
        record.deleted = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotificationKind, NotificationPayload};
    use chrono::Duration;

    fn email_and_sms() -> NewNotification {
        NewNotification::new(
            Uuid::new_v4(),
            NotificationKind::BookingConfirmClient,
            NotificationPayload::new("Confirmed").with_text("Your booking is confirmed"),
        )
        .with_email("client@example.com")
        .with_phone("+15550001111")
    }

    #[tokio::test]
    async fn test_enqueue_and_get() {
        let store = InMemoryOutboxStore::new();
        let record = store.enqueue(email_and_sms()).await.unwrap();

        let loaded = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(loaded.email.is_pending());
        assert!(loaded.sms.is_pending());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid() {
        let store = InMemoryOutboxStore::new();
        let no_recipient = NewNotification::new(
            Uuid::new_v4(),
            NotificationKind::Welcome,
            NotificationPayload::new("Hi").with_text("Hi"),
        );
        let err = store.enqueue(no_recipient).await.unwrap_err();
        assert!(matches!(err, NotificationError::Validation(_)));
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_claim_respects_limit_and_creation_order() {
        let store = InMemoryOutboxStore::new();
        let base = Utc::now();
        for offset in [3, 1, 2] {
            let mut record = email_and_sms().into_record(base).unwrap();
            record.created_at = base + Duration::seconds(offset);
            store.insert(record).await;
        }

        let first = store.claim_batch(2).await.unwrap();
        let offsets: Vec<_> = first
            .iter()
            .map(|r| (r.created_at - base).num_seconds())
            .collect();
        assert_eq!(offsets, vec![1, 2]);

        let second = store.claim_batch(10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(store.claim_batch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_records_are_never_claimed() {
        let store = InMemoryOutboxStore::new();
        let record = store.enqueue(email_and_sms()).await.unwrap();
        store.soft_delete(record.id).await.unwrap();

        assert!(store.claim_batch(10).await.unwrap().is_empty());
        assert!(store.get(record.id).await.unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn test_mark_done_requires_claim() {
        let store = InMemoryOutboxStore::new();
        let record = store.enqueue(email_and_sms()).await.unwrap();

        let err = store.mark_channel_done(record.id, Channel::Email).await.unwrap_err();
        assert!(matches!(err, NotificationError::InvalidTransition(_)));

        let missing = store.mark_channel_done(Uuid::new_v4(), Channel::Email).await;
        assert!(matches!(missing, Err(NotificationError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_requeue_channel_only_from_claimed() {
        let store = InMemoryOutboxStore::new();
        let record = store.enqueue(email_and_sms()).await.unwrap();
        assert!(store.requeue_channel(record.id, Channel::Sms).await.is_err());

        store.claim_batch(1).await.unwrap();
        store.requeue_channel(record.id, Channel::Sms).await.unwrap();

        let loaded = store.get(record.id).await.unwrap().unwrap();
        assert!(loaded.email.is_claimed());
        assert!(loaded.sms.is_pending());
    }

    #[tokio::test]
    async fn test_requeue_stale_uses_cutoff() {
        let store = InMemoryOutboxStore::new();
        let record = store.enqueue(email_and_sms()).await.unwrap();
        store.claim_batch(1).await.unwrap();

        let before_claim = Utc::now() - Duration::hours(1);
        assert_eq!(store.requeue_stale(before_claim).await.unwrap(), 0);

        let after_claim = Utc::now() + Duration::seconds(1);
        assert_eq!(store.requeue_stale(after_claim).await.unwrap(), 1);

        let loaded = store.get(record.id).await.unwrap().unwrap();
        assert!(loaded.email.is_pending() && loaded.sms.is_pending());
    }

    #[tokio::test]
    async fn test_fault_is_consumed_once() {
        let store = InMemoryOutboxStore::new();
        store.enqueue(email_and_sms()).await.unwrap();
        store.fail_next_claim(ClaimFault::RowCountMismatch);

        let err = store.claim_batch(10).await.unwrap_err();
        assert!(matches!(
            err,
            NotificationError::ClaimInconsistency { expected: 1, actual: 0 }
        ));
        assert_eq!(store.claim_batch(10).await.unwrap().len(), 1);
    }
}
