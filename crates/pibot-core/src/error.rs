//! Error taxonomy shared across PiBot crates.

use thiserror::Error;

/// Errors surfaced by PiBot components.
#[derive(Debug, Error)]
pub enum PiBotError {
    /// Caller-supplied argument violates a precondition.
    #[error("{0}")]
    Validation(String),

    /// The reminder does not exist, or belongs to another chat.
    /// Both cases render identically so ids cannot be probed across chats.
    #[error("reminder not found")]
    NotFound,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Monitor error: {0}")]
    Monitor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PiBotError {
    /// Shorthand for a validation failure.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether this error came from user input rather than the system.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, PiBotError>;
