use super::{EmailSender, OutgoingEmail, OutgoingSms, SmsSender};
use crate::error::NotificationResult;
use async_trait::async_trait;
use tracing::debug;

/// Accepts every send without doing any I/O.
///
/// Lets channels complete in environments with no transport configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSender;

#[async_trait]
impl EmailSender for DisabledSender {
    async fn send(&self, email: &OutgoingEmail) -> NotificationResult<()> {
        debug!(to = %email.to, subject = %email.subject, "Email disabled, skipping send");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

#[async_trait]
impl SmsSender for DisabledSender {
    async fn send(&self, sms: &OutgoingSms) -> NotificationResult<()> {
        debug!(to = %sms.to, "SMS disabled, skipping send");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}
