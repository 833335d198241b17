//! # PiBot Scheduler
//!
//! Durable recurring reminders for a single-host chat bot.
//!
//! ## Design
//! - SQLite persistence with versioned migrations, survives restarts
//! - One tokio task per active reminder, sleeping on its own timer
//! - A single lock orders every mutation against in-flight triggers
//! - Recovery re-arms active reminders without replaying missed triggers
//!
//! ## Architecture
//! ```text
//! CommandLayer
//!   └── ReminderScheduler (id → timer map, one lock)
//!         ├── ReminderStore (SQLite: reminders, reminder_history)
//!         │     └── MigrationRunner (schema_migrations ledger)
//!         └── trigger task per reminder
//!               └── NotificationSink → "🔔 Reminder: {message}"
//! ```

pub mod clock;
pub mod engine;
pub mod migrations;
pub mod reminder;
pub mod store;

pub use clock::{Clock, SystemClock, TokioClock};
pub use engine::{RecoveredReminder, ReminderScheduler};
pub use migrations::{Migration, MigrationRunner};
pub use reminder::{HistoryEntry, Reminder, ReminderEvent, ReminderStatus, notification_text};
pub use store::{ReminderStore, TriggerTimes};
