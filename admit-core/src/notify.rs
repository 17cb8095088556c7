use admit_shared::models::events::{NotificationEvent, NotificationKind};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Fire-and-forget delivery to the notification collaborator.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Sends a notification and swallows failures; money-relevant writes must not
/// depend on delivery.
pub async fn notify_best_effort(
    sink: &Arc<dyn NotificationSink>,
    user_id: &str,
    kind: NotificationKind,
    title: &str,
    message: &str,
    data: serde_json::Value,
) {
    let event = NotificationEvent::new(user_id, kind, title, message, data);
    if let Err(e) = sink.notify(&event).await {
        warn!(user_id, kind = kind.as_str(), "Notification delivery failed: {}", e);
    }
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(
            user_id = %event.user_id,
            kind = event.kind.as_str(),
            "Notification: {}",
            event.title
        );
        Ok(())
    }
}
