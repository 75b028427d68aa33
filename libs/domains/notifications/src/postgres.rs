use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, FromQueryResult, Statement, TransactionTrait,
    Value,
};
use std::str::FromStr;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{NotificationError, NotificationResult};
use crate::models::{
    Channel, ChannelState, ChannelStatus, NewNotification, NotificationKind, NotificationPayload,
    NotificationRecord,
};
use crate::store::{OutboxStore, transition_error};

/// PostgreSQL implementation of OutboxStore using SeaORM
#[derive(Clone)]
pub struct PgOutboxStore {
    db: DatabaseConnection,
}

impl PgOutboxStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

/// Helper struct for deserializing notification rows from the database
#[derive(Debug, FromQueryResult)]
struct NotificationRow {
    id: Uuid,
    correlation_id: Uuid,
    kind: String,
    recipient_email: Option<String>,
    recipient_phone: Option<String>,
    reply_to: Option<String>,
    payload: serde_json::Value,
    email_state: String,
    email_claimed_at: Option<DateTime<Utc>>,
    email_completed_at: Option<DateTime<Utc>>,
    sms_state: String,
    sms_claimed_at: Option<DateTime<Utc>>,
    sms_completed_at: Option<DateTime<Utc>>,
    deleted: bool,
    created_at: DateTime<Utc>,
}

fn parse_state(
    column: &str,
    raw: &str,
    claimed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
) -> NotificationResult<ChannelState> {
    let status = ChannelStatus::from_str(raw).map_err(|_| {
        NotificationError::Persistence(format!("unknown {} value: {}", column, raw))
    })?;
    ChannelState::from_parts(status, claimed_at, completed_at)
}

impl TryFrom<NotificationRow> for NotificationRecord {
    type Error = NotificationError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let kind = NotificationKind::from_str(&row.kind)
            .map_err(|_| NotificationError::Persistence(format!("unknown kind: {}", row.kind)))?;
        let payload: NotificationPayload = serde_json::from_value(row.payload)
            .map_err(|e| NotificationError::Persistence(format!("invalid payload: {}", e)))?;

        Ok(NotificationRecord {
            id: row.id,
            correlation_id: row.correlation_id,
            kind,
            recipient_email: row.recipient_email,
            recipient_phone: row.recipient_phone,
            reply_to: row.reply_to,
            payload,
            email: parse_state(
                "email_state",
                &row.email_state,
                row.email_claimed_at,
                row.email_completed_at,
            )?,
            sms: parse_state(
                "sms_state",
                &row.sms_state,
                row.sms_claimed_at,
                row.sms_completed_at,
            )?,
            deleted: row.deleted,
            created_at: row.created_at,
        })
    }
}

/// Column prefix for a channel's state columns
fn prefix(channel: Channel) -> &'static str {
    match channel {
        Channel::Email => "email",
        Channel::Sms => "sms",
    }
}

fn rows_into_records(rows: Vec<NotificationRow>) -> NotificationResult<Vec<NotificationRecord>> {
    rows.into_iter().map(NotificationRecord::try_from).collect()
}

const SELECT_CLAIMABLE: &str = r#"
    SELECT * FROM notifications
    WHERE deleted = false AND (email_state = 'pending' OR sms_state = 'pending')
    ORDER BY created_at, id
    LIMIT $1
    FOR UPDATE SKIP LOCKED
"#;

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn enqueue(&self, notification: NewNotification) -> NotificationResult<NotificationRecord> {
        let record = notification.into_record(Utc::now())?;

        let sql = r#"
            INSERT INTO notifications (
                id, correlation_id, kind, recipient_email, recipient_phone, reply_to, payload,
                email_state, email_claimed_at, email_completed_at,
                sms_state, sms_claimed_at, sms_completed_at,
                deleted, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL, NULL, $9, NULL, NULL, false, $10)
        "#;

        let payload = serde_json::to_value(&record.payload)
            .map_err(|e| NotificationError::Persistence(format!("invalid payload: {}", e)))?;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                record.id.into(),
                record.correlation_id.into(),
                record.kind.to_string().into(),
                record.recipient_email.clone().into(),
                record.recipient_phone.clone().into(),
                record.reply_to.clone().into(),
                payload.into(),
                record.email.status().to_string().into(),
                record.sms.status().to_string().into(),
                record.created_at.into(),
            ],
        );

        let result = self.db.execute_raw(stmt).await?;
        if result.rows_affected() != 1 {
            return Err(NotificationError::Persistence(format!(
                "insert of {} affected {} rows",
                record.id,
                result.rows_affected()
            )));
        }

        debug!(record_id = %record.id, kind = %record.kind, "Notification enqueued");
        Ok(record)
    }

    async fn claim_batch(&self, limit: u64) -> NotificationResult<Vec<NotificationRecord>> {
        let limit = i64::try_from(limit)
            .map_err(|_| NotificationError::Validation(format!("claim limit too large: {}", limit)))?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let txn = self.db.begin().await?;

        let select = Statement::from_sql_and_values(DbBackend::Postgres, SELECT_CLAIMABLE, [limit.into()]);
        let mut records = rows_into_records(NotificationRow::find_by_statement(select).all(&txn).await?)?;
        if records.is_empty() {
            txn.commit().await?;
            return Ok(records);
        }

        let now = Utc::now();
        let placeholders: Vec<String> = (0..records.len()).map(|i| format!("${}", i + 2)).collect();
        let sql = format!(
            r#"
            UPDATE notifications SET
                email_state = CASE WHEN email_state = 'pending' THEN 'claimed' ELSE email_state END,
                email_claimed_at = CASE WHEN email_state = 'pending' THEN $1 ELSE email_claimed_at END,
                sms_state = CASE WHEN sms_state = 'pending' THEN 'claimed' ELSE sms_state END,
                sms_claimed_at = CASE WHEN sms_state = 'pending' THEN $1 ELSE sms_claimed_at END
            WHERE deleted = false
              AND (email_state = 'pending' OR sms_state = 'pending')
              AND id IN ({})
            "#,
            placeholders.join(", ")
        );

        let mut values: Vec<Value> = Vec::with_capacity(records.len() + 1);
        values.push(now.into());
        values.extend(records.iter().map(|r| Value::from(r.id)));

        let update = Statement::from_sql_and_values(DbBackend::Postgres, sql, values);
        let affected = txn.execute_raw(update).await?.rows_affected();
        let expected = records.len() as u64;

        if affected != expected {
            warn!(expected, affected, "Claim batch row count mismatch, rolling back");
            txn.rollback().await?;
            return Err(NotificationError::ClaimInconsistency {
                expected,
                actual: affected,
            });
        }

        txn.commit().await?;

        for record in &mut records {
            record.claim(now);
        }
        Ok(records)
    }

    async fn mark_channel_done(&self, id: Uuid, channel: Channel) -> NotificationResult<()> {
        let c = prefix(channel);
        let sql = format!(
            "UPDATE notifications SET {c}_state = 'done', {c}_completed_at = $2 \
             WHERE id = $1 AND {c}_state = 'claimed'"
        );
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [id.into(), Utc::now().into()]);

        if self.db.execute_raw(stmt).await?.rows_affected() == 1 {
            return Ok(());
        }

        // Nothing flipped: either already done or never claimed
        let record = self.get(id).await?.ok_or(NotificationError::NotFound(id))?;
        if record.channel(channel).is_done() {
            Ok(())
        } else {
            Err(transition_error(&record, channel, "complete"))
        }
    }

    async fn get(&self, id: Uuid) -> NotificationResult<Option<NotificationRecord>> {
        let sql = "SELECT * FROM notifications WHERE id = $1";
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [id.into()]);

        NotificationRow::find_by_statement(stmt)
            .one(&self.db)
            .await?
            .map(NotificationRecord::try_from)
            .transpose()
    }

    async fn requeue_channel(&self, id: Uuid, channel: Channel) -> NotificationResult<()> {
        let c = prefix(channel);
        let sql = format!(
            "UPDATE notifications SET {c}_state = 'pending', {c}_claimed_at = NULL \
             WHERE id = $1 AND {c}_state = 'claimed'"
        );
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [id.into()]);

        if self.db.execute_raw(stmt).await?.rows_affected() == 1 {
            return Ok(());
        }

        let record = self.get(id).await?.ok_or(NotificationError::NotFound(id))?;
        Err(transition_error(&record, channel, "requeue"))
    }

    async fn requeue_stale(&self, older_than: DateTime<Utc>) -> NotificationResult<u64> {
        let sql = r#"
            UPDATE notifications SET
                email_state = CASE WHEN email_state = 'claimed' AND email_claimed_at < $1
                    THEN 'pending' ELSE email_state END,
                email_claimed_at = CASE WHEN email_state = 'claimed' AND email_claimed_at < $1
                    THEN NULL ELSE email_claimed_at END,
                sms_state = CASE WHEN sms_state = 'claimed' AND sms_claimed_at < $1
                    THEN 'pending' ELSE sms_state END,
                sms_claimed_at = CASE WHEN sms_state = 'claimed' AND sms_claimed_at < $1
                    THEN NULL ELSE sms_claimed_at END
            WHERE deleted = false
              AND ((email_state = 'claimed' AND email_claimed_at < $1)
                OR (sms_state = 'claimed' AND sms_claimed_at < $1))
        "#;
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [older_than.into()]);

        Ok(self.db.execute_raw(stmt).await?.rows_affected())
    }

    async fn soft_delete(&self, id: Uuid) -> NotificationResult<()> {
        let sql = "UPDATE notifications SET deleted = true WHERE id = $1";
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [id.into()]);

        if self.db.execute_raw(stmt).await?.rows_affected() == 0 {
            return Err(NotificationError::NotFound(id));
        }
        Ok(())
    }
}
