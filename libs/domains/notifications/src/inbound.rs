//! Reply relay for inbound mail.
//!
//! Replies to a notification arrive at its signed reply address as an SNS
//! envelope around an SES receipt. The handler recovers the original record
//! from the address, strips the quoted history from the reply and queues a
//! `MessageRelay` notification to the party the original was sent for.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use consumer_pool::{HandlerContext, MessageHandler, PoolError, PoolResult};
use mail_parser::{Message, MessageParser, PartType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{NotificationError, NotificationResult};
use crate::models::{NewNotification, NotificationKind, NotificationPayload, NotificationRecord};
use crate::reply_token::ReplyTokenSigner;
use crate::store::OutboxStore;

/// SNS envelope as it arrives from the queue; `Message` holds the SES JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMailEvent {
    #[serde(rename = "Message")]
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct SesReceipt {
    mail: SesMail,
    /// Base64 raw MIME message
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesMail {
    common_headers: CommonHeaders,
}

#[derive(Debug, Default, Deserialize)]
struct CommonHeaders {
    #[serde(default)]
    to: Vec<String>,
    #[serde(default)]
    from: Vec<String>,
    #[serde(default)]
    subject: Option<String>,
}

/// The parts of an inbound reply the relay needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMail {
    pub to: String,
    pub from: Option<String>,
    /// Display name of the sender, decoded from the message's From header
    pub sender_name: Option<String>,
    pub subject: String,
    /// Plain-text body with quoted history removed
    pub body: String,
}

impl InboundMailEvent {
    pub fn parse(&self) -> NotificationResult<InboundMail> {
        let receipt: SesReceipt = serde_json::from_str(&self.message)
            .map_err(|e| NotificationError::InboundParse(format!("invalid SES receipt: {}", e)))?;
        let headers = receipt.mail.common_headers;

        let to = headers
            .to
            .into_iter()
            .next()
            .ok_or_else(|| NotificationError::InboundParse("no To address".into()))?;

        let content = receipt
            .content
            .ok_or_else(|| NotificationError::InboundParse("receipt has no content".into()))?;
        let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
        let raw = STANDARD
            .decode(compact)
            .map_err(|e| NotificationError::InboundParse(format!("content is not base64: {}", e)))?;

        let message = MessageParser::default()
            .parse(&raw)
            .ok_or_else(|| NotificationError::InboundParse("content is not a MIME message".into()))?;
        let text = first_text_plain(&message)
            .ok_or_else(|| NotificationError::InboundParse("no text/plain part".into()))?;

        let sender_name = message
            .from()
            .and_then(|from| from.first())
            .and_then(|addr| addr.name())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let subject = headers
            .subject
            .or_else(|| message.subject().map(str::to_string))
            .unwrap_or_default();

        Ok(InboundMail {
            to,
            from: headers.from.into_iter().next(),
            sender_name,
            subject,
            body: strip_quoted(&text),
        })
    }
}

/// Text of the first text/plain body part. HTML-only mail has none.
fn first_text_plain(message: &Message<'_>) -> Option<String> {
    message.text_bodies().find_map(|part| match &part.body {
        PartType::Text(text) => Some(text.to_string()),
        _ => None,
    })
}

/// First text/plain body of a raw MIME message, charset and transfer encoding decoded.
pub fn extract_text_plain(raw: &[u8]) -> Option<String> {
    let message = MessageParser::default().parse(raw)?;
    first_text_plain(&message)
}

fn is_attribution_line(line: &str) -> bool {
    let line = line.trim();
    line.starts_with("On ") && line.ends_with("wrote:")
}

/// Keep only what the sender wrote above the quoted history.
pub fn strip_quoted(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_end();
        if is_attribution_line(trimmed)
            || trimmed == "--"
            || line == "-- "
            || trimmed.contains("-----Original Message-----")
        {
            break;
        }
        if trimmed.trim_start().starts_with('>') {
            continue;
        }
        kept.push(trimmed);
    }
    kept.join("\n").trim().to_string()
}

/// Consumer-pool handler relaying replies to the original sender.
pub struct InboundMailHandler {
    store: Arc<dyn OutboxStore>,
    tokens: Arc<ReplyTokenSigner>,
}

impl InboundMailHandler {
    pub fn new(store: Arc<dyn OutboxStore>, tokens: Arc<ReplyTokenSigner>) -> Self {
        Self { store, tokens }
    }

    /// Queue the relay. `Ok(None)` when the original had no one to relay to.
    pub async fn relay(&self, event: &InboundMailEvent) -> NotificationResult<Option<NotificationRecord>> {
        let mail = event.parse()?;
        let original_id = self.tokens.parse_reply_address(&mail.to)?;
        let original = self
            .store
            .get(original_id)
            .await?
            .ok_or(NotificationError::NotFound(original_id))?;

        let Some(relay_to) = original.reply_to.clone() else {
            debug!(record_id = %original.id, "Reply to a notification without reply-to, ignoring");
            return Ok(None);
        };

        if mail.body.is_empty() {
            return Err(NotificationError::InboundParse("reply has no text".into()));
        }

        let mut payload = NotificationPayload::new(mail.subject).with_text(mail.body);
        payload.sender_name = mail.sender_name;

        let mut relay = NewNotification::new(original.correlation_id, NotificationKind::MessageRelay, payload)
            .with_email(relay_to);
        // Lets the other side answer back through the same relay
        if let Some(recipient) = original.recipient_email.clone() {
            relay = relay.with_reply_to(recipient);
        }

        let record = self.store.enqueue(relay).await?;
        info!(record_id = %record.id, original_id = %original.id, "Reply relayed");
        Ok(Some(record))
    }
}

#[async_trait]
impl MessageHandler<InboundMailEvent> for InboundMailHandler {
    async fn handle(&self, ctx: &HandlerContext, event: &InboundMailEvent) -> PoolResult<()> {
        self.relay(event).await.map(|_| ()).map_err(|e| {
            warn!(worker = ctx.worker, handle = %ctx.handle, error = %e, "Inbound mail not relayed");
            PoolError::handler(e.to_string())
        })
    }

    fn name(&self) -> &'static str {
        "inbound-mail"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelState;
    use crate::store::InMemoryOutboxStore;
    use chrono::Utc;
    use uuid::Uuid;

    const MULTIPART: &str = "From: Jane Client <jane@example.com>\r\n\
Subject: Re: Booking confirmed\r\n\
Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain; charset=UTF-8\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
Can we move it to 3pm? Caf=C3=A9 is =\r\n\
closed.\r\n\
\r\n\
On Mon, Jan 5, 2026 at 9:00 AM Bookings <noreply@example.com> wrote:\r\n\
> Your booking is confirmed\r\n\
--b1\r\n\
Content-Type: text/html; charset=UTF-8\r\n\
\r\n\
<p>Can we move it to 3pm?</p>\r\n\
--b1--\r\n";

    fn event(to: &str, mime: &str) -> InboundMailEvent {
        let receipt = serde_json::json!({
            "mail": {
                "commonHeaders": {
                    "to": [to],
                    "from": ["Jane Client <jane@example.com>"],
                    "subject": "Re: Booking confirmed"
                }
            },
            "content": STANDARD.encode(mime)
        });
        InboundMailEvent {
            message: receipt.to_string(),
        }
    }

    #[test]
    fn test_extracts_plain_part_of_multipart() {
        let text = extract_text_plain(MULTIPART.as_bytes()).unwrap();
        assert!(text.starts_with("Can we move it to 3pm? Café is closed."));
    }

    #[test]
    fn test_single_part_base64() {
        let raw = format!(
            "Content-Type: text/plain\nContent-Transfer-Encoding: base64\n\n{}\n",
            STANDARD.encode("See you then")
        );
        assert_eq!(extract_text_plain(raw.as_bytes()).unwrap().trim(), "See you then");
    }

    #[test]
    fn test_latin1_quoted_printable_is_decoded() {
        let raw = b"Content-Type: text/plain; charset=iso-8859-1\n\
Content-Transfer-Encoding: quoted-printable\n\n\
Caf=E9 ferm=E9\n";
        assert_eq!(extract_text_plain(raw).unwrap().trim(), "Caf\u{e9} ferm\u{e9}");
    }

    #[test]
    fn test_html_only_has_no_text() {
        assert!(extract_text_plain(b"Content-Type: text/html\n\n<p>x</p>").is_none());
    }

    #[test]
    fn test_strip_quoted() {
        let text = "Sounds good\n\n> earlier\nthanks\n-- \nJane\n";
        assert_eq!(strip_quoted(text), "Sounds good\n\nthanks");
        assert_eq!(
            strip_quoted("Yes\n-----Original Message-----\nFrom: x"),
            "Yes"
        );
    }

    #[test]
    fn test_parse_event() {
        let mail = event("reply+tok@example.com", MULTIPART).parse().unwrap();
        assert_eq!(mail.to, "reply+tok@example.com");
        assert_eq!(mail.subject, "Re: Booking confirmed");
        assert_eq!(mail.body, "Can we move it to 3pm? Café is closed.");
    }

    #[test]
    fn test_sender_name_with_comma_is_kept_whole() {
        let mime = MULTIPART.replace(
            "From: Jane Client <jane@example.com>",
            "From: \"Smith, Jane\" <jane@example.com>",
        );
        let mail = event("reply+tok@example.com", &mime).parse().unwrap();
        assert_eq!(mail.sender_name.as_deref(), Some("Smith, Jane"));
    }

    #[test]
    fn test_parse_rejects_missing_to() {
        let bad = InboundMailEvent {
            message: r#"{"mail":{"commonHeaders":{"to":[]}},"content":""}"#.into(),
        };
        assert!(matches!(bad.parse(), Err(NotificationError::InboundParse(_))));
    }

    fn setup() -> (Arc<InMemoryOutboxStore>, Arc<ReplyTokenSigner>, InboundMailHandler) {
        let store = Arc::new(InMemoryOutboxStore::new());
        let tokens = Arc::new(ReplyTokenSigner::new("secret", 90, "reply@example.com").unwrap());
        let handler = InboundMailHandler::new(store.clone(), tokens.clone());
        (store, tokens, handler)
    }

    #[tokio::test]
    async fn test_relay_enqueues_message_to_original_sender() {
        let (store, tokens, handler) = setup();
        let original = store
            .enqueue(
                NewNotification::new(
                    Uuid::new_v4(),
                    NotificationKind::BookingNewClient,
                    NotificationPayload::new("Booking confirmed").with_text("Booked"),
                )
                .with_email("jane@example.com")
                .with_reply_to("provider@example.com"),
            )
            .await
            .unwrap();

        let address = tokens.create_reply_address(original.id).unwrap();
        let relayed = handler.relay(&event(&address, MULTIPART)).await.unwrap().unwrap();

        assert_eq!(relayed.kind, NotificationKind::MessageRelay);
        assert_eq!(relayed.correlation_id, original.correlation_id);
        assert_eq!(relayed.recipient_email.as_deref(), Some("provider@example.com"));
        assert_eq!(relayed.reply_to.as_deref(), Some("jane@example.com"));
        assert_eq!(relayed.payload.subject, "Re: Booking confirmed");
        assert_eq!(relayed.payload.sender_name.as_deref(), Some("Jane Client"));
        assert_eq!(relayed.email, ChannelState::Pending);
        assert_eq!(store.all().await.len(), 2);
    }

    #[tokio::test]
    async fn test_relay_ignores_records_without_reply_to() {
        let (store, tokens, handler) = setup();
        let mut original = NewNotification::new(
            Uuid::new_v4(),
            NotificationKind::Welcome,
            NotificationPayload::new("Welcome").with_text("Hi"),
        )
        .with_email("jane@example.com")
        .into_record(Utc::now())
        .unwrap();
        original.reply_to = None;
        store.insert(original.clone()).await;

        let address = tokens.create_reply_address(original.id).unwrap();
        assert!(handler.relay(&event(&address, MULTIPART)).await.unwrap().is_none());
        assert_eq!(store.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_handler_maps_errors_to_pool_errors() {
        let (_store, _tokens, handler) = setup();
        let ctx = HandlerContext {
            worker: 0,
            handle: "1-0".into(),
            received_at: Utc::now(),
            redelivered: false,
            batch_size: 1,
        };

        let err = handler
            .handle(&ctx, &event("reply@example.com", MULTIPART))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Handler(_)));
    }
}
