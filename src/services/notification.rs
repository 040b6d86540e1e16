use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// A notification owed to the payer after a terminal transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationRequest {
    Email {
        to: String,
        subject: String,
        body: String,
    },
    Sms {
        to: String,
        body: String,
    },
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivery transport boundary. Real email/SMS delivery is owned by the
/// platform's messaging service; the payment core only hands requests over
/// and never retries them.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, request: &NotificationRequest) -> Result<(), NotificationError>;
}

/// Placeholder transport that logs the notification with a structured format.
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn send(&self, request: &NotificationRequest) -> Result<(), NotificationError> {
        match request {
            NotificationRequest::Email { to, subject, .. } => {
                info!(to = %to, subject = %subject, "🔔 NOTIFICATION: email queued");
            }
            NotificationRequest::Sms { to, .. } => {
                info!(to = %to, "🔔 NOTIFICATION: sms queued");
            }
        }
        Ok(())
    }
}
