//! Turns claimed records into channel sends.
//!
//! Each claimed channel is sent and marked done on its own. A failed send
//! leaves the channel claimed; only operator requeue puts it back in line.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{NotificationError, NotificationResult};
use crate::models::{Channel, NotificationRecord};
use crate::providers::{EmailSender, OutgoingEmail, OutgoingSms, SmsSender};
use crate::reply_token::ReplyTokenSigner;
use crate::store::OutboxStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Prepended as `"<prefix>: "`; empty disables it
    pub subject_prefix: String,
    pub sender_address: String,
    /// Used when the payload names no sender
    pub sender_name: String,
}

/// What happened to one channel of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// Channel was not claimed, nothing to do
    Skipped,
    Sent,
    /// Send failed; channel stays claimed
    SendFailed(String),
    /// Sent, but recording completion failed; the next requeue will resend
    MarkFailed(String),
}

impl ChannelOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ChannelOutcome::SendFailed(_) | ChannelOutcome::MarkFailed(_))
    }

    fn status_label(&self) -> &'static str {
        match self {
            ChannelOutcome::Skipped => "skipped",
            ChannelOutcome::Sent => "sent",
            ChannelOutcome::SendFailed(_) => "send_failed",
            ChannelOutcome::MarkFailed(_) => "mark_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub record_id: Uuid,
    pub email: ChannelOutcome,
    pub sms: ChannelOutcome,
}

impl DispatchReport {
    pub fn sent(&self) -> usize {
        [&self.email, &self.sms]
            .into_iter()
            .filter(|o| **o == ChannelOutcome::Sent)
            .count()
    }

    pub fn failed(&self) -> usize {
        [&self.email, &self.sms]
            .into_iter()
            .filter(|o| o.is_failure())
            .count()
    }
}

pub struct Dispatcher {
    store: Arc<dyn OutboxStore>,
    email: Arc<dyn EmailSender>,
    sms: Arc<dyn SmsSender>,
    tokens: Arc<ReplyTokenSigner>,
    config: DispatcherConfig,
}

/// Prefix a subject once; replies that already carry it are left alone.
pub fn apply_subject_prefix(prefix: &str, subject: &str) -> String {
    if prefix.is_empty() {
        return subject.to_string();
    }
    let tag = format!("{}: ", prefix);
    if subject.contains(&tag) {
        subject.to_string()
    } else {
        format!("{}{}", tag, subject)
    }
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        email: Arc<dyn EmailSender>,
        sms: Arc<dyn SmsSender>,
        tokens: Arc<ReplyTokenSigner>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            email,
            sms,
            tokens,
            config,
        }
    }

    /// Build the outgoing email for a record's email channel.
    pub fn build_email(&self, record: &NotificationRecord) -> NotificationResult<OutgoingEmail> {
        let to = record
            .recipient_email
            .clone()
            .ok_or_else(|| NotificationError::send_failure(Channel::Email, "no recipient email"))?;

        let reply_to = match record.reply_to {
            Some(_) => Some(self.tokens.create_reply_address(record.id)?),
            None => None,
        };

        let from_name = record
            .payload
            .sender_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.config.sender_name.clone());

        Ok(OutgoingEmail {
            from_name,
            from_address: self.config.sender_address.clone(),
            to,
            reply_to,
            subject: apply_subject_prefix(&self.config.subject_prefix, &record.payload.subject),
            html_body: record.payload.html_body.clone(),
            text_body: record.payload.text_body.clone(),
        })
    }

    pub fn build_sms(&self, record: &NotificationRecord) -> NotificationResult<OutgoingSms> {
        let to = record
            .recipient_phone
            .clone()
            .ok_or_else(|| NotificationError::send_failure(Channel::Sms, "no recipient phone"))?;
        let body = record
            .payload
            .text_body
            .clone()
            .ok_or_else(|| NotificationError::send_failure(Channel::Sms, "no text body"))?;
        Ok(OutgoingSms { to, body })
    }

    async fn send(&self, record: &NotificationRecord, channel: Channel) -> NotificationResult<()> {
        match channel {
            Channel::Email => {
                let email = self.build_email(record)?;
                self.email.send(&email).await
            }
            Channel::Sms => {
                let sms = self.build_sms(record)?;
                self.sms.send(&sms).await
            }
        }
    }

    async fn dispatch_channel(&self, record: &NotificationRecord, channel: Channel) -> ChannelOutcome {
        if !record.channel(channel).is_claimed() {
            return ChannelOutcome::Skipped;
        }

        let outcome = match self.send(record, channel).await {
            Err(e) => {
                warn!(record_id = %record.id, channel = %channel, error = %e, "Send failed, channel left claimed");
                ChannelOutcome::SendFailed(e.to_string())
            }
            Ok(()) => match self.store.mark_channel_done(record.id, channel).await {
                Ok(()) => {
                    debug!(record_id = %record.id, channel = %channel, "Channel done");
                    ChannelOutcome::Sent
                }
                Err(e) => {
                    warn!(record_id = %record.id, channel = %channel, error = %e, "Sent but could not mark done");
                    ChannelOutcome::MarkFailed(e.to_string())
                }
            },
        };

        metrics::counter!(
            "outbox_channel_sends_total",
            "channel" => channel.to_string(),
            "status" => outcome.status_label()
        )
        .increment(1);

        outcome
    }

    /// Send every claimed channel of one record, channels concurrently.
    pub async fn dispatch(&self, record: &NotificationRecord) -> DispatchReport {
        let (email, sms) = tokio::join!(
            self.dispatch_channel(record, Channel::Email),
            self.dispatch_channel(record, Channel::Sms)
        );
        DispatchReport {
            record_id: record.id,
            email,
            sms,
        }
    }

    pub async fn dispatch_all(&self, records: &[NotificationRecord]) -> Vec<DispatchReport> {
        let reports = join_all(records.iter().map(|r| self.dispatch(r))).await;
        let failed: usize = reports.iter().map(DispatchReport::failed).sum();
        if failed > 0 {
            info!(records = records.len(), failed, "Dispatched batch with failures");
        }
        reports
    }
}
