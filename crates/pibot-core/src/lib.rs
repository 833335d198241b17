//! # PiBot Core
//!
//! Shared building blocks for every PiBot crate: the error taxonomy,
//! configuration, chat message types, and the traits that decouple the
//! reminder scheduler from the chat transport.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::PiBotConfig;
pub use error::{PiBotError, Result};
pub use traits::{Channel, NotificationSink};
pub use types::{IncomingMessage, OutgoingMessage};
