//! Notification sink, where scheduled reminders are delivered.

use async_trait::async_trait;

use crate::error::Result;

/// Delivers a text message to a chat.
///
/// Implementations must not retry; the reminder scheduler logs failures and
/// keeps the schedule alive.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()>;
}
