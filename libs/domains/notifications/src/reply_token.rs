//! Signed reply addresses.
//!
//! An email sent on behalf of someone carries `Reply-To: local+<token>@domain`.
//! The token is an HS256 JWT whose subject is the outbox record id, so an
//! inbound reply can be traced back to the notification it answers.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{NotificationError, NotificationResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReplyClaims {
    /// Outbox record id
    sub: String,
    iat: i64,
    exp: i64,
}

#[derive(Clone)]
pub struct ReplyTokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    local_part: String,
    domain: String,
}

impl std::fmt::Debug for ReplyTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyTokenSigner")
            .field("ttl_days", &self.ttl.num_days())
            .field("address", &format!("{}@{}", self.local_part, self.domain))
            .finish_non_exhaustive()
    }
}

impl ReplyTokenSigner {
    /// `reply_address` is the base mailbox replies arrive at, e.g. `reply@example.com`.
    pub fn new(secret: &str, ttl_days: i64, reply_address: &str) -> NotificationResult<Self> {
        if secret.is_empty() {
            return Err(NotificationError::Config("reply token secret is empty".into()));
        }
        let (local_part, domain) = reply_address
            .split_once('@')
            .filter(|(l, d)| !l.is_empty() && !d.is_empty() && !l.contains('+'))
            .ok_or_else(|| NotificationError::Config(format!("invalid reply address: {}", reply_address)))?;

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::days(ttl_days),
            local_part: local_part.to_string(),
            domain: domain.to_string(),
        })
    }

    pub fn create_token(&self, record_id: Uuid) -> NotificationResult<String> {
        let now = Utc::now();
        let claims = ReplyClaims {
            sub: record_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn verify_token(&self, token: &str) -> NotificationResult<Uuid> {
        let data = decode::<ReplyClaims>(token, &self.decoding, &Validation::new(Algorithm::HS256))?;
        Uuid::parse_str(&data.claims.sub)
            .map_err(|e| NotificationError::ReplyToken(format!("invalid subject: {}", e)))
    }

    pub fn create_reply_address(&self, record_id: Uuid) -> NotificationResult<String> {
        Ok(format!(
            "{}+{}@{}",
            self.local_part,
            self.create_token(record_id)?,
            self.domain
        ))
    }

    /// Accepts a bare address or a `Name <address>` mailbox.
    pub fn parse_reply_address(&self, address: &str) -> NotificationResult<Uuid> {
        let address = address.trim();
        let address = match (address.rfind('<'), address.rfind('>')) {
            (Some(start), Some(end)) if start < end => &address[start + 1..end],
            _ => address,
        };

        let parts: Vec<&str> = address.split(['+', '@']).collect();
        match parts.as_slice() {
            [_, token, _] if !token.is_empty() => self.verify_token(token),
            _ => Err(NotificationError::ReplyToken(format!(
                "not a reply address: {}",
                address
            ))),
        }
    }
}
