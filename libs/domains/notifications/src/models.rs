//! Data models for the notifications domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;
use validator::Validate;

use crate::error::{NotificationError, NotificationResult};

/// The domain event a notification was produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    BookingNewClient,
    BookingNewProvider,
    BookingConfirmClient,
    BookingEditClient,
    BookingCancelClient,
    BookingCancelProvider,
    BookingReminderClient,
    BookingReminderProvider,
    PaymentClient,
    PaymentProvider,
    Invoice,
    ClientInvite,
    PasswordReset,
    EmailVerify,
    Welcome,
    /// A reply relayed between the two parties of an earlier notification
    MessageRelay,
    Contact,
}

/// An independent delivery path for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Email, Channel::Sms];
}

/// Stored form of a channel's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChannelStatus {
    Absent,
    Pending,
    Claimed,
    Done,
}

/// Per-channel delivery state. Timestamps live inside the variant that
/// owns them, so "claimed without a claim time" cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ChannelState {
    /// No recipient for this channel
    Absent,
    Pending,
    Claimed {
        claimed_at: DateTime<Utc>,
    },
    Done {
        claimed_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
}

impl ChannelState {
    pub fn status(&self) -> ChannelStatus {
        match self {
            ChannelState::Absent => ChannelStatus::Absent,
            ChannelState::Pending => ChannelStatus::Pending,
            ChannelState::Claimed { .. } => ChannelStatus::Claimed,
            ChannelState::Done { .. } => ChannelStatus::Done,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ChannelState::Pending)
    }

    pub fn is_claimed(&self) -> bool {
        matches!(self, ChannelState::Claimed { .. })
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ChannelState::Done { .. })
    }

    /// Nothing left to do on this channel
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Absent | ChannelState::Done { .. })
    }

    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ChannelState::Claimed { claimed_at } | ChannelState::Done { claimed_at, .. } => {
                Some(*claimed_at)
            }
            _ => None,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ChannelState::Done { completed_at, .. } => Some(*completed_at),
            _ => None,
        }
    }

    /// Rebuild from stored columns.
    pub fn from_parts(
        status: ChannelStatus,
        claimed_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
    ) -> NotificationResult<Self> {
        match (status, claimed_at, completed_at) {
            (ChannelStatus::Absent, _, _) => Ok(ChannelState::Absent),
            (ChannelStatus::Pending, _, _) => Ok(ChannelState::Pending),
            (ChannelStatus::Claimed, Some(claimed_at), _) => Ok(ChannelState::Claimed { claimed_at }),
            (ChannelStatus::Done, Some(claimed_at), Some(completed_at)) => Ok(ChannelState::Done {
                claimed_at,
                completed_at,
            }),
            (status, claimed_at, completed_at) => Err(NotificationError::Persistence(format!(
                "inconsistent channel columns: state={} claimed_at={:?} completed_at={:?}",
                status, claimed_at, completed_at
            ))),
        }
    }
}

/// Content needed to perform a send. Never updated after enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    /// Plain-text email body; also the SMS message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
    /// Display name for the sender, overriding the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

impl NotificationPayload {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Default::default()
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html_body = Some(html.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text_body = Some(text.into());
        self
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    fn has_text(&self) -> bool {
        self.text_body.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    fn has_body(&self) -> bool {
        self.has_text() || self.html_body.as_deref().is_some_and(|h| !h.trim().is_empty())
    }
}

/// An outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub correlation_id: Uuid,
    pub kind: NotificationKind,
    pub recipient_email: Option<String>,
    pub recipient_phone: Option<String>,
    /// Party on whose behalf this was sent; replies are relayed back to them
    pub reply_to: Option<String>,
    pub payload: NotificationPayload,
    pub email: ChannelState,
    pub sms: ChannelState,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn channel(&self, channel: Channel) -> &ChannelState {
        match channel {
            Channel::Email => &self.email,
            Channel::Sms => &self.sms,
        }
    }

    pub fn channel_mut(&mut self, channel: Channel) -> &mut ChannelState {
        match channel {
            Channel::Email => &mut self.email,
            Channel::Sms => &mut self.sms,
        }
    }

    pub fn recipient(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Email => self.recipient_email.as_deref(),
            Channel::Sms => self.recipient_phone.as_deref(),
        }
    }

    /// Eligible for claim selection
    pub fn is_claimable(&self) -> bool {
        !self.deleted && (self.email.is_pending() || self.sms.is_pending())
    }

    /// Every channel is done or absent
    pub fn is_complete(&self) -> bool {
        self.email.is_terminal() && self.sms.is_terminal()
    }

    pub fn claimed_channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.channel(*c).is_claimed())
            .collect()
    }

    /// Flip every pending channel to claimed. Returns false when nothing was pending.
    pub fn claim(&mut self, now: DateTime<Utc>) -> bool {
        let mut flipped = false;
        for channel in Channel::ALL {
            let state = self.channel_mut(channel);
            if state.is_pending() {
                *state = ChannelState::Claimed { claimed_at: now };
                flipped = true;
            }
        }
        flipped
    }
}

/// Input to [`OutboxStore::enqueue`](crate::store::OutboxStore::enqueue).
///
/// Length limits mirror the `notifications` columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewNotification {
    pub correlation_id: Uuid,
    pub kind: NotificationKind,
    #[validate(email, length(max = 255))]
    pub recipient_email: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub recipient_phone: Option<String>,
    #[validate(email, length(max = 255))]
    pub reply_to: Option<String>,
    pub payload: NotificationPayload,
}

impl NewNotification {
    pub fn new(correlation_id: Uuid, kind: NotificationKind, payload: NotificationPayload) -> Self {
        Self {
            correlation_id,
            kind,
            recipient_email: None,
            recipient_phone: None,
            reply_to: None,
            payload,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.recipient_email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.recipient_phone = Some(phone.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn validate(&self) -> NotificationResult<()> {
        if self.recipient_email.is_none() && self.recipient_phone.is_none() {
            return Err(NotificationError::Validation(
                "at least one of recipient email or phone is required".into(),
            ));
        }
        Validate::validate(self)?;

        if self.recipient_email.is_some() && !self.payload.has_body() {
            return Err(NotificationError::Validation(
                "email requires an html or text body".into(),
            ));
        }
        if self.recipient_phone.is_some() && !self.payload.has_text() {
            return Err(NotificationError::Validation("sms requires a text body".into()));
        }
        Ok(())
    }

    /// Blank recipients count as absent; the rest are trimmed.
    fn normalized(mut self) -> Self {
        let clean = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        self.recipient_email = clean(self.recipient_email);
        self.recipient_phone = clean(self.recipient_phone);
        self.reply_to = clean(self.reply_to);
        self
    }

    /// Validate and build the stored record: present recipients start pending.
    pub fn into_record(self, now: DateTime<Utc>) -> NotificationResult<NotificationRecord> {
        let new = self.normalized();
        new.validate()?;

        let NewNotification {
            correlation_id,
            kind,
            recipient_email,
            recipient_phone,
            reply_to,
            payload,
        } = new;
        let pending_if = |present: bool| {
            if present {
                ChannelState::Pending
            } else {
                ChannelState::Absent
            }
        };

        Ok(NotificationRecord {
            id: Uuid::now_v7(),
            correlation_id,
            kind,
            email: pending_if(recipient_email.is_some()),
            sms: pending_if(recipient_phone.is_some()),
            recipient_email,
            recipient_phone,
            reply_to,
            payload,
            deleted: false,
            created_at: now,
        })
    }
}
