//! Notifications Domain
//!
//! Durable outbox for email and SMS notifications, the claim protocol that
//! hands pending work to exactly one sweep at a time, and the dispatcher
//! that drives each channel to completion.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Domain handlers │     │ Inbound mail     │ ← consumer-pool handler
//! └────────┬────────┘     └────────┬─────────┘
//!          │ enqueue               │ enqueue (message relay)
//! ┌────────▼───────────────────────▼─────────┐
//! │              OutboxStore                 │ ← Postgres / in-memory
//! └────────┬─────────────────────────────────┘
//!          │ claim_batch (one transaction)
//! ┌────────▼────────┐
//! │   ClaimSweep    │ ← cron scheduled
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │   Dispatcher    │ ← email and SMS concurrently, mark each done
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ Send providers  │ ← SMTP, SendGrid, HTTP SMS, disabled
//! └─────────────────┘
//! ```
//!
//! Channel state per record: `Absent | Pending → Claimed → Done`. A failed
//! send leaves the channel `Claimed`; it is only retried after an operator
//! requeue, never automatically.
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{NewNotification, NotificationKind, NotificationPayload, OutboxStore, PgOutboxStore};
//!
//! let store = PgOutboxStore::new(db);
//! store
//!     .enqueue(
//!         NewNotification::new(booking_id, NotificationKind::BookingNewClient, payload)
//!             .with_email("client@example.com"),
//!     )
//!     .await?;
//! ```

pub mod dispatcher;
pub mod error;
pub mod inbound;
pub mod models;
pub mod postgres;
pub mod providers;
pub mod reply_token;
pub mod store;
pub mod sweep;

// Re-export commonly used types
pub use dispatcher::{ChannelOutcome, DispatchReport, Dispatcher, DispatcherConfig};
pub use error::{NotificationError, NotificationResult};
pub use inbound::{InboundMail, InboundMailEvent, InboundMailHandler};
pub use models::{
    Channel, ChannelState, ChannelStatus, NewNotification, NotificationKind, NotificationPayload,
    NotificationRecord,
};
pub use postgres::PgOutboxStore;
pub use providers::{DisabledSender, EmailSender, SmsSender};
pub use reply_token::ReplyTokenSigner;
pub use store::{ClaimFault, InMemoryOutboxStore, OutboxStore};
pub use sweep::{ClaimSweep, SweepConfig, SweepReport};
