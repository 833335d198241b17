//! Chat message types exchanged between channels and the command layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message received from a chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Channel the message came from ("telegram").
    pub channel: String,
    /// Conversation id; replies and reminders are scoped to it.
    pub chat_id: i64,
    /// Sender user id; checked against the allowlist.
    pub sender_id: i64,
    pub sender_name: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Text formatting requested for an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    Html,
    Markdown,
}

impl ParseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseMode::Html => "HTML",
            ParseMode::Markdown => "Markdown",
        }
    }
}

/// A message to deliver to a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    pub content: String,
    pub parse_mode: Option<ParseMode>,
}

impl OutgoingMessage {
    /// Plain-text message.
    pub fn text(chat_id: i64, content: impl Into<String>) -> Self {
        Self {
            chat_id,
            content: content.into(),
            parse_mode: None,
        }
    }

    /// HTML-formatted message.
    pub fn html(chat_id: i64, content: impl Into<String>) -> Self {
        Self {
            chat_id,
            content: content.into(),
            parse_mode: Some(ParseMode::Html),
        }
    }
}

impl IncomingMessage {
    /// Split a `/command@bot args` message into `(command, args)`.
    /// Returns `None` for messages that are not commands.
    pub fn command(&self) -> Option<(&str, &str)> {
        let text = self.content.trim_start();
        let rest = text.strip_prefix('/')?;
        let (head, args) = match rest.find(char::is_whitespace) {
            Some(idx) => (&rest[..idx], rest[idx..].trim()),
            None => (rest, ""),
        };
        let name = head.split('@').next().unwrap_or(head);
        if name.is_empty() {
            return None;
        }
        Some((name, args))
    }
}
