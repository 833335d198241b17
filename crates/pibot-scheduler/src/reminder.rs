//! Reminder definitions, the core data model for recurring notifications.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use pibot_core::error::PiBotError;

/// Label used by `/reminder_create`.
pub const DEFAULT_KIND: &str = "custom";

/// Longest accepted interval: one year.
pub const MAX_INTERVAL_MINUTES: i64 = 365 * 24 * 60;

/// A durable, chat-owned recurring reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    /// Store-assigned id.
    pub id: i64,
    /// Owning chat; every chat-scoped operation checks it.
    pub chat_id: i64,
    /// Free-form label ("custom", "water", ...).
    pub kind: String,
    /// Period between triggers, in `1..=MAX_INTERVAL_MINUTES`.
    pub interval_minutes: i64,
    pub status: ReminderStatus,
    /// Text delivered on every trigger.
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// Scheduled due time; advanced after each trigger.
    pub next_trigger_at: Option<DateTime<Utc>>,
}

/// Reminder status. There is no deleted state: deleting removes the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Active,
    Paused,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Active => "active",
            ReminderStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReminderStatus {
    type Err = PiBotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReminderStatus::Active),
            "paused" => Ok(ReminderStatus::Paused),
            other => Err(PiBotError::Persistence(format!(
                "unknown reminder status '{other}'"
            ))),
        }
    }
}

/// Lifecycle event recorded in the reminder history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderEvent {
    Created,
    Triggered,
    Paused,
    Resumed,
    IntervalUpdated,
}

impl ReminderEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderEvent::Created => "created",
            ReminderEvent::Triggered => "triggered",
            ReminderEvent::Paused => "paused",
            ReminderEvent::Resumed => "resumed",
            ReminderEvent::IntervalUpdated => "interval_updated",
        }
    }
}

impl fmt::Display for ReminderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReminderEvent {
    type Err = PiBotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ReminderEvent::Created),
            "triggered" => Ok(ReminderEvent::Triggered),
            "paused" => Ok(ReminderEvent::Paused),
            "resumed" => Ok(ReminderEvent::Resumed),
            "interval_updated" => Ok(ReminderEvent::IntervalUpdated),
            other => Err(PiBotError::Persistence(format!(
                "unknown reminder event '{other}'"
            ))),
        }
    }
}

/// One row of reminder history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub reminder_id: i64,
    pub event: ReminderEvent,
    pub at: DateTime<Utc>,
}

impl Reminder {
    /// One interval after `at`, or `None` if that is out of range.
    pub fn next_after(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        after_minutes(at, self.interval_minutes)
    }

    pub fn is_active(&self) -> bool {
        self.status == ReminderStatus::Active
    }

    /// When the reminder is due, derived from whatever was persisted:
    /// `next_trigger_at`, else `last_triggered_at + interval`,
    /// else `created_at + interval`. A row whose due time overflows is never due.
    pub fn due_at(&self) -> DateTime<Utc> {
        self.next_trigger_at.unwrap_or_else(|| {
            self.next_after(self.last_triggered_at.unwrap_or(self.created_at))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }
}

/// `at + minutes`, or `None` on overflow.
pub fn after_minutes(at: DateTime<Utc>, minutes: i64) -> Option<DateTime<Utc>> {
    Duration::try_minutes(minutes).and_then(|d| at.checked_add_signed(d))
}

/// Text delivered to the chat when a reminder fires.
pub fn notification_text(message: &str) -> String {
    format!("🔔 Reminder: {message}")
}
