//! SQLite-backed reminder store.
//!
//! Pure data access: no timers, no authorization. Every method is a single
//! statement or a short read-then-write under the connection lock.
//! Timestamps are RFC 3339 UTC strings with millisecond precision; rows written
//! with SQLite's `CURRENT_TIMESTAMP` format are also accepted on read.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Params, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use pibot_core::error::{PiBotError, Result};

use crate::clock::{Clock, SystemClock};
use crate::migrations::MigrationRunner;
use crate::reminder::{HistoryEntry, Reminder, ReminderEvent, ReminderStatus, after_minutes};

const REMINDER_COLUMNS: &str =
    "id, chat_id, type, interval, status, message, created_at, last_triggered, next_trigger";

/// Timestamps written by a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerTimes {
    pub last_triggered_at: DateTime<Utc>,
    pub next_trigger_at: DateTime<Utc>,
}

/// Durable reminder store.
pub struct ReminderStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl ReminderStore {
    /// Open or create the reminder database and bring its schema current.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| PiBotError::Persistence(format!("DB open {}: {e}", path.display())))?;

        // WAL for better concurrent reads; harmless if unsupported.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        Self::from_connection(conn, clock)
    }

    /// In-memory store, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn open_in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PiBotError::Persistence(format!("DB open: {e}")))?;
        Self::from_connection(conn, clock)
    }

    fn from_connection(mut conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| PiBotError::Persistence(format!("enable foreign keys: {e}")))?;

        let applied = MigrationRunner::embedded()?.run(&mut conn)?;
        if !applied.is_empty() {
            tracing::info!("Applied {} migration(s): {:?}", applied.len(), applied);
        }

        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    /// Clock used for every timestamp this store writes.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PiBotError::Persistence(format!("Lock: {e}")))
    }

    /// Highest applied schema version.
    pub fn schema_version(&self) -> Result<Option<u32>> {
        let conn = self.conn()?;
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |r| {
            r.get::<_, Option<u32>>(0)
        })
        .map_err(|e| PiBotError::Persistence(format!("Schema version: {e}")))
    }

    // ─── Reminders ──────────────────────────────────────

    /// Insert an active reminder due one interval from now.
    pub fn create(&self, chat_id: i64, kind: &str, interval_minutes: i64, message: &str) -> Result<Reminder> {
        let now = self.clock.now();
        let next = after_minutes(now, interval_minutes)
            .ok_or_else(|| PiBotError::validation(format!("interval of {interval_minutes} minutes is too large")))?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO reminders (chat_id, type, interval, status, message, created_at, next_trigger)
             VALUES (?1, ?2, ?3, 'active', ?4, ?5, ?6)",
            params![chat_id, kind, interval_minutes, message, ts(now), ts(next)],
        )
        .map_err(|e| PiBotError::Persistence(format!("Create reminder: {e}")))?;

        Ok(Reminder {
            id: conn.last_insert_rowid(),
            chat_id,
            kind: kind.to_string(),
            interval_minutes,
            status: ReminderStatus::Active,
            message: message.to_string(),
            created_at: truncate(now),
            last_triggered_at: None,
            next_trigger_at: Some(truncate(next)),
        })
    }

    /// Get a reminder by id.
    pub fn get(&self, id: i64) -> Result<Option<Reminder>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1"),
            [id],
            row_to_reminder,
        )
        .optional()
        .map_err(|e| PiBotError::Persistence(format!("Get reminder {id}: {e}")))
    }

    /// Active reminders of one chat, soonest first.
    pub fn list_active_by_chat(&self, chat_id: i64) -> Result<Vec<Reminder>> {
        self.query_reminders(
            &format!(
                "SELECT {REMINDER_COLUMNS} FROM reminders
                 WHERE chat_id = ?1 AND status = 'active'
                 ORDER BY next_trigger ASC"
            ),
            [chat_id],
        )
    }

    /// Every reminder of one chat, active first.
    pub fn list_by_chat(&self, chat_id: i64) -> Result<Vec<Reminder>> {
        self.query_reminders(
            &format!(
                "SELECT {REMINDER_COLUMNS} FROM reminders
                 WHERE chat_id = ?1
                 ORDER BY status ASC, next_trigger ASC"
            ),
            [chat_id],
        )
    }

    /// All active reminders across chats, soonest first. Used by recovery.
    pub fn list_all_active(&self) -> Result<Vec<Reminder>> {
        self.query_reminders(
            &format!(
                "SELECT {REMINDER_COLUMNS} FROM reminders
                 WHERE status = 'active'
                 ORDER BY next_trigger ASC"
            ),
            [],
        )
    }

    fn query_reminders<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Reminder>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| PiBotError::Persistence(format!("Query reminders: {e}")))?;
        let rows = stmt
            .query_map(params, row_to_reminder)
            .map_err(|e| PiBotError::Persistence(format!("Query reminders: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| PiBotError::Persistence(format!("Scan reminder: {e}")))
    }

    /// Number of stored reminders.
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        conn.query_row("SELECT COUNT(*) FROM reminders", [], |r| r.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(|e| PiBotError::Persistence(format!("Count reminders: {e}")))
    }

    pub fn update_status(&self, id: i64, status: ReminderStatus) -> Result<()> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "UPDATE reminders SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )
            .map_err(|e| PiBotError::Persistence(format!("Update reminder status: {e}")))?;
        affected(rows)
    }

    pub fn update_interval(&self, id: i64, interval_minutes: i64) -> Result<()> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "UPDATE reminders SET interval = ?1 WHERE id = ?2",
                params![interval_minutes, id],
            )
            .map_err(|e| PiBotError::Persistence(format!("Update reminder interval: {e}")))?;
        affected(rows)
    }

    /// Mark a reminder active and due at `next` in one write.
    pub fn activate(&self, id: i64, next: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "UPDATE reminders SET status = 'active', next_trigger = ?1 WHERE id = ?2",
                params![ts(next), id],
            )
            .map_err(|e| PiBotError::Persistence(format!("Activate reminder: {e}")))?;
        affected(rows)
    }

    /// Change the interval and the due time together.
    pub fn reschedule(&self, id: i64, interval_minutes: i64, next: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "UPDATE reminders SET interval = ?1, next_trigger = ?2 WHERE id = ?3",
                params![interval_minutes, ts(next), id],
            )
            .map_err(|e| PiBotError::Persistence(format!("Reschedule reminder: {e}")))?;
        affected(rows)
    }

    /// Persist the due time of a freshly armed timer.
    pub fn set_next_trigger(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "UPDATE reminders SET next_trigger = ?1 WHERE id = ?2",
                params![ts(at), id],
            )
            .map_err(|e| PiBotError::Persistence(format!("Update next trigger: {e}")))?;
        affected(rows)
    }

    /// Record a trigger: `last_triggered = now`, `next_trigger = now + interval`
    /// using the interval currently stored.
    pub fn update_trigger(&self, id: i64) -> Result<TriggerTimes> {
        let conn = self.conn()?;
        let interval: i64 = conn
            .query_row("SELECT interval FROM reminders WHERE id = ?1", [id], |r| r.get(0))
            .optional()
            .map_err(|e| PiBotError::Persistence(format!("Get reminder interval: {e}")))?
            .ok_or(PiBotError::NotFound)?;

        let now = self.clock.now();
        let next = after_minutes(now, interval).ok_or_else(|| {
            PiBotError::Persistence(format!("Reminder {id}: interval of {interval} minutes overflows"))
        })?;
        let rows = conn
            .execute(
                "UPDATE reminders SET last_triggered = ?1, next_trigger = ?2 WHERE id = ?3",
                params![ts(now), ts(next), id],
            )
            .map_err(|e| PiBotError::Persistence(format!("Update reminder trigger: {e}")))?;
        affected(rows)?;

        Ok(TriggerTimes {
            last_triggered_at: truncate(now),
            next_trigger_at: truncate(next),
        })
    }

    /// Delete a reminder and, through the foreign key, its history.
    pub fn delete(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let rows = conn
            .execute("DELETE FROM reminders WHERE id = ?1", [id])
            .map_err(|e| PiBotError::Persistence(format!("Delete reminder: {e}")))?;
        affected(rows)
    }

    // ─── History ──────────────────────────────────────

    pub fn record_event(&self, id: i64, event: ReminderEvent) -> Result<()> {
        let now = self.clock.now();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO reminder_history (reminder_id, event, created_at) VALUES (?1, ?2, ?3)",
            params![id, event.as_str(), ts(now)],
        )
        .map_err(|e| PiBotError::Persistence(format!("Record reminder event: {e}")))?;
        Ok(())
    }

    /// Most recent history entries first.
    pub fn history(&self, id: i64, limit: usize) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT reminder_id, event, created_at FROM reminder_history
                 WHERE reminder_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| PiBotError::Persistence(format!("Query history: {e}")))?;
        let rows = stmt
            .query_map(params![id, limit as i64], |row| {
                let event: String = row.get(1)?;
                let at: String = row.get(2)?;
                Ok(HistoryEntry {
                    reminder_id: row.get(0)?,
                    event: event.parse().map_err(|e| conversion_error(1, e))?,
                    at: parse_ts(&at).ok_or_else(|| conversion_error(2, bad_timestamp(&at)))?,
                })
            })
            .map_err(|e| PiBotError::Persistence(format!("Query history: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| PiBotError::Persistence(format!("Scan history: {e}")))
    }

    #[cfg(test)]
    pub(crate) fn execute_raw<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        let conn = self.conn()?;
        conn.execute(sql, params)
            .map_err(|e| PiBotError::Persistence(e.to_string()))
    }
}

fn affected(rows: usize) -> Result<()> {
    if rows == 0 {
        Err(PiBotError::NotFound)
    } else {
        Ok(())
    }
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Drop sub-millisecond precision so returned values match what was stored.
fn truncate(t: DateTime<Utc>) -> DateTime<Utc> {
    parse_ts(&ts(t)).unwrap_or(t)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|n| n.and_utc())
        })
}

fn bad_timestamp(s: &str) -> PiBotError {
    PiBotError::Persistence(format!("invalid timestamp '{s}'"))
}

fn conversion_error(idx: usize, err: PiBotError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn optional_ts(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value
        .map(|s| parse_ts(&s).ok_or_else(|| conversion_error(idx, bad_timestamp(&s))))
        .transpose()
}

fn row_to_reminder(row: &Row<'_>) -> rusqlite::Result<Reminder> {
    let status: String = row.get(4)?;
    let created_at: String = row.get(6)?;

    Ok(Reminder {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        kind: row.get(2)?,
        interval_minutes: row.get(3)?,
        status: status.parse().map_err(|e| conversion_error(4, e))?,
        message: row.get(5)?,
        created_at: parse_ts(&created_at)
            .ok_or_else(|| conversion_error(6, bad_timestamp(&created_at)))?,
        last_triggered_at: optional_ts(7, row.get(7)?)?,
        next_trigger_at: optional_ts(8, row.get(8)?)?,
    })
}
