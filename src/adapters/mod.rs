pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::jobs::NotificationJob;
use crate::ports::NotificationSink;

pub use memory::MemoryStore;

/// Default notification sink: logs the notification and succeeds. Email
/// rendering and delivery live outside this service.
#[derive(Debug, Clone, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn send(&self, notification: &NotificationJob) -> anyhow::Result<()> {
        tracing::info!(
            kind = %notification.kind,
            to = %notification.to,
            "Notification dispatched"
        );
        Ok(())
    }
}
