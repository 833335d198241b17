//! Trait seams between PiBot components.

pub mod channel;
pub mod notify;

pub use channel::Channel;
pub use notify::NotificationSink;
