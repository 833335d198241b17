//! Channel trait: a chat transport that can connect and send messages.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::OutgoingMessage;

#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name ("telegram").
    fn name(&self) -> &str;

    /// Verify credentials and mark the channel ready.
    async fn connect(&mut self) -> Result<()>;

    /// Whether `connect` succeeded.
    fn is_connected(&self) -> bool;

    /// Deliver a message.
    async fn send(&self, message: OutgoingMessage) -> Result<()>;
}
