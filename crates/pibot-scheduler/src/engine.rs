//! Reminder scheduler: one trigger task per active reminder.
//!
//! The id → timer map is guarded by a single async lock. Every chat-scoped
//! mutation holds it across the ownership check, the store write, and the
//! timer change, and a firing trigger holds it across its status re-check,
//! the delivery, and its bookkeeping. A pause racing a trigger therefore sees
//! at most one extra notification, and never one after the pause is durable.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use pibot_core::config::SchedulerConfig;
use pibot_core::error::{PiBotError, Result};
use pibot_core::traits::NotificationSink;

use crate::clock::Clock;
use crate::reminder::{
    DEFAULT_KIND, HistoryEntry, MAX_INTERVAL_MINUTES, Reminder, ReminderEvent, ReminderStatus, after_minutes,
    notification_text,
};
use crate::store::ReminderStore;

/// Delay before a trigger retries after the store could not be read.
const READ_RETRY_DELAY: Duration = Duration::from_secs(60);
/// Deadline used when `now + delay` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A reminder re-armed by [`ReminderScheduler::recover_active_reminders`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredReminder {
    pub id: i64,
    pub chat_id: i64,
    pub kind: String,
    pub message: String,
    pub interval_minutes: i64,
    /// Time until the first trigger after recovery.
    pub delay: Duration,
}

struct TimerHandle {
    generation: u64,
    task: JoinHandle<()>,
}

/// Trigger task state. `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerState {
    Scheduled { due: Instant },
    Firing,
    Terminated,
}

struct Inner {
    store: Arc<ReminderStore>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    timers: Mutex<HashMap<i64, TimerHandle>>,
    generation: AtomicU64,
    send_timeout: Duration,
}

/// Keeps live timers consistent with the persisted reminders.
#[derive(Clone)]
pub struct ReminderScheduler {
    inner: Arc<Inner>,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<ReminderStore>,
        sink: Arc<dyn NotificationSink>,
        config: &SchedulerConfig,
    ) -> Self {
        let clock = store.clock();
        Self {
            inner: Arc::new(Inner {
                store,
                sink,
                clock,
                timers: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                send_timeout: Duration::from_secs(config.send_timeout_secs),
            }),
        }
    }

    pub fn store(&self) -> &Arc<ReminderStore> {
        &self.inner.store
    }

    /// Create a `custom` reminder and arm its timer. Returns the new id.
    pub async fn create_reminder(&self, chat_id: i64, interval_minutes: i64, message: &str) -> Result<i64> {
        self.create_reminder_with_kind(chat_id, DEFAULT_KIND, interval_minutes, message)
            .await
    }

    /// Create a reminder with an explicit kind label and arm its timer.
    pub async fn create_reminder_with_kind(
        &self,
        chat_id: i64,
        kind: &str,
        interval_minutes: i64,
        message: &str,
    ) -> Result<i64> {
        validate_interval(interval_minutes)?;
        let message = message.trim();
        if message.is_empty() {
            return Err(PiBotError::validation("reminder message cannot be empty"));
        }

        let mut timers = self.inner.timers.lock().await;
        let reminder = self
            .inner
            .store
            .create(chat_id, kind, interval_minutes, message)?;
        self.inner.record(reminder.id, ReminderEvent::Created);
        self.inner
            .arm(&mut timers, reminder.id, minutes(interval_minutes));

        tracing::info!(
            "⏰ Reminder {} created for chat {chat_id}: every {interval_minutes} min",
            reminder.id
        );
        Ok(reminder.id)
    }

    /// Active reminders of a chat, soonest first.
    pub fn list_reminders(&self, chat_id: i64) -> Result<Vec<Reminder>> {
        self.inner.store.list_active_by_chat(chat_id)
    }

    /// Every reminder of a chat, paused ones included.
    pub fn list_all_reminders(&self, chat_id: i64) -> Result<Vec<Reminder>> {
        self.inner.store.list_by_chat(chat_id)
    }

    pub async fn pause_reminder(&self, chat_id: i64, id: i64) -> Result<()> {
        let mut timers = self.inner.timers.lock().await;
        self.inner.owned(chat_id, id)?;

        self.inner.store.update_status(id, ReminderStatus::Paused)?;
        if let Some(handle) = timers.remove(&id) {
            handle.task.abort();
        }
        self.inner.record(id, ReminderEvent::Paused);

        tracing::info!("⏸️ Reminder {id} paused");
        Ok(())
    }

    /// Resume a reminder. The timer always restarts with a full interval.
    pub async fn resume_reminder(&self, chat_id: i64, id: i64) -> Result<()> {
        let mut timers = self.inner.timers.lock().await;
        let reminder = self.inner.owned(chat_id, id)?;

        let next = next_trigger(self.inner.clock.now(), reminder.interval_minutes)?;
        self.inner.store.activate(id, next)?;
        self.inner
            .arm(&mut timers, id, minutes(reminder.interval_minutes));
        self.inner.record(id, ReminderEvent::Resumed);

        tracing::info!("▶️ Reminder {id} resumed, next at {next}");
        Ok(())
    }

    pub async fn delete_reminder(&self, chat_id: i64, id: i64) -> Result<()> {
        let mut timers = self.inner.timers.lock().await;
        self.inner.owned(chat_id, id)?;

        self.inner.store.delete(id)?;
        if let Some(handle) = timers.remove(&id) {
            handle.task.abort();
        }

        tracing::info!("🗑️ Reminder {id} deleted");
        Ok(())
    }

    /// Change the interval. A running timer restarts at the new interval;
    /// a paused reminder stays paused.
    pub async fn update_interval(&self, chat_id: i64, id: i64, interval_minutes: i64) -> Result<()> {
        validate_interval(interval_minutes)?;

        let mut timers = self.inner.timers.lock().await;
        self.inner.owned(chat_id, id)?;

        if timers.contains_key(&id) {
            let next = next_trigger(self.inner.clock.now(), interval_minutes)?;
            self.inner.store.reschedule(id, interval_minutes, next)?;
            self.inner.arm(&mut timers, id, minutes(interval_minutes));
        } else {
            self.inner.store.update_interval(id, interval_minutes)?;
        }
        self.inner.record(id, ReminderEvent::IntervalUpdated);

        tracing::info!("🔁 Reminder {id} interval set to {interval_minutes} min");
        Ok(())
    }

    /// Recent lifecycle events of a reminder, newest first.
    pub async fn reminder_history(&self, chat_id: i64, id: i64, limit: usize) -> Result<Vec<HistoryEntry>> {
        let _timers = self.inner.timers.lock().await;
        self.inner.owned(chat_id, id)?;
        self.inner.store.history(id, limit)
    }

    /// Arm a timer for every active reminder. Past-due reminders wait one full
    /// interval from now; missed triggers are not replayed. Safe to call again:
    /// re-arming replaces the existing timer for an id.
    pub async fn recover_active_reminders(&self) -> Result<Vec<RecoveredReminder>> {
        let mut timers = self.inner.timers.lock().await;
        let now = self.inner.clock.now();
        let mut recovered = Vec::new();

        for reminder in self.inner.store.list_all_active()? {
            let due = reminder.due_at();
            let delay = if due <= now {
                match reminder.next_after(now) {
                    Some(next) => {
                        if let Err(e) = self.inner.store.set_next_trigger(reminder.id, next) {
                            tracing::warn!("Reminder {}: failed to persist next trigger: {e}", reminder.id);
                        }
                    }
                    None => tracing::warn!(
                        "Reminder {}: interval of {} minutes overflows, next trigger not persisted",
                        reminder.id,
                        reminder.interval_minutes
                    ),
                }
                minutes(reminder.interval_minutes)
            } else {
                (due - now).to_std().unwrap_or(Duration::ZERO)
            };

            self.inner.arm(&mut timers, reminder.id, delay);
            tracing::info!(
                "♻️ Recovered reminder {} for chat {}, next in {}s",
                reminder.id,
                reminder.chat_id,
                delay.as_secs()
            );

            recovered.push(RecoveredReminder {
                id: reminder.id,
                chat_id: reminder.chat_id,
                kind: reminder.kind,
                message: reminder.message,
                interval_minutes: reminder.interval_minutes,
                delay,
            });
        }

        Ok(recovered)
    }

    /// Number of live trigger tasks.
    pub async fn active_timer_count(&self) -> usize {
        self.inner.timers.lock().await.len()
    }

    pub async fn has_timer(&self, id: i64) -> bool {
        self.inner.timers.lock().await.contains_key(&id)
    }

    /// Stop every trigger task. Persisted state is left untouched.
    pub async fn shutdown(&self) {
        let mut timers = self.inner.timers.lock().await;
        let count = timers.len();
        for (_, handle) in timers.drain() {
            handle.task.abort();
        }
        tracing::info!("Scheduler stopped ({count} timers)");
    }
}

impl Inner {
    /// The reminder, if it exists and belongs to `chat_id`.
    fn owned(&self, chat_id: i64, id: i64) -> Result<Reminder> {
        match self.store.get(id)? {
            Some(reminder) if reminder.chat_id == chat_id => Ok(reminder),
            _ => Err(PiBotError::NotFound),
        }
    }

    fn record(&self, id: i64, event: ReminderEvent) {
        if let Err(e) = self.store.record_event(id, event) {
            tracing::warn!("Reminder {id}: failed to record {event}: {e}");
        }
    }

    /// Spawn a trigger task due after `delay`, replacing any existing one.
    fn arm(self: &Arc<Self>, timers: &mut HashMap<i64, TimerHandle>, id: i64, delay: Duration) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let due = deadline(delay);
        let task = tokio::spawn(run_trigger(Arc::clone(self), id, generation, due));

        if let Some(old) = timers.insert(id, TimerHandle { generation, task }) {
            old.task.abort();
        }
    }

    /// One `Firing` step. Holds the lock for the whole step.
    async fn fire(&self, id: i64, generation: u64) -> TriggerState {
        let mut timers = self.timers.lock().await;

        // Replaced or stopped while waiting for the lock.
        if timers.get(&id).map(|h| h.generation) != Some(generation) {
            return TriggerState::Terminated;
        }

        let reminder = match self.store.get(id) {
            Ok(Some(reminder)) if reminder.is_active() => reminder,
            Ok(_) => {
                timers.remove(&id);
                tracing::debug!("Reminder {id} no longer active, trigger stopped");
                return TriggerState::Terminated;
            }
            Err(e) => {
                tracing::warn!("Reminder {id}: status check failed, retrying: {e}");
                return TriggerState::Scheduled {
                    due: deadline(READ_RETRY_DELAY),
                };
            }
        };

        let text = notification_text(&reminder.message);
        match tokio::time::timeout(self.send_timeout, self.sink.send(reminder.chat_id, &text)).await {
            Ok(Ok(())) => tracing::debug!("🔔 Reminder {id} delivered to chat {}", reminder.chat_id),
            Ok(Err(e)) => tracing::warn!("Reminder {id}: delivery to chat {} failed: {e}", reminder.chat_id),
            Err(_) => tracing::warn!(
                "Reminder {id}: delivery to chat {} timed out after {:?}",
                reminder.chat_id,
                self.send_timeout
            ),
        }

        if let Err(e) = self.store.update_trigger(id) {
            tracing::warn!("Reminder {id}: failed to update trigger times: {e}");
        }
        self.record(id, ReminderEvent::Triggered);

        TriggerState::Scheduled {
            due: deadline(minutes(reminder.interval_minutes)),
        }
    }
}

async fn run_trigger(inner: Arc<Inner>, id: i64, generation: u64, due: Instant) {
    let mut state = TriggerState::Scheduled { due };
    loop {
        state = match state {
            TriggerState::Scheduled { due } => {
                tokio::time::sleep_until(due).await;
                TriggerState::Firing
            }
            TriggerState::Firing => inner.fire(id, generation).await,
            TriggerState::Terminated => break,
        };
    }
}

fn validate_interval(interval_minutes: i64) -> Result<()> {
    if interval_minutes <= 0 {
        return Err(PiBotError::validation("interval must be a positive number of minutes"));
    }
    if interval_minutes > MAX_INTERVAL_MINUTES {
        return Err(PiBotError::validation(format!(
            "interval cannot exceed {MAX_INTERVAL_MINUTES} minutes (one year)"
        )));
    }
    Ok(())
}

fn next_trigger(now: chrono::DateTime<chrono::Utc>, interval_minutes: i64) -> Result<chrono::DateTime<chrono::Utc>> {
    after_minutes(now, interval_minutes)
        .ok_or_else(|| PiBotError::validation(format!("interval of {interval_minutes} minutes is too large")))
}

fn minutes(m: i64) -> Duration {
    Duration::from_secs((m.max(0) as u64).saturating_mul(60))
}

fn deadline(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use async_trait::async_trait;
    use chrono::SecondsFormat;
    use tokio::sync::{Notify, Semaphore};

    /// Records deliveries; optionally blocks inside `send` until released.
    #[derive(Default)]
    struct RecordingSink {
        sent: std::sync::Mutex<Vec<(i64, String)>>,
        fail: bool,
        gate: Option<Semaphore>,
        entered: Notify,
    }

    impl RecordingSink {
        fn failing() -> Self {
            Self { fail: true, ..Default::default() }
        }

        fn gated() -> Self {
            Self { gate: Some(Semaphore::new(0)), ..Default::default() }
        }

        fn sent(&self) -> Vec<(i64, String)> {
            self.sent.lock().unwrap().clone()
        }

        fn release(&self) {
            if let Some(gate) = &self.gate {
                gate.add_permits(1);
            }
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, chat_id: i64, text: &str) -> Result<()> {
            self.entered.notify_one();
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if self.fail {
                return Err(PiBotError::Channel("telegram unreachable".into()));
            }
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(())
        }
    }

    fn setup(sink: Arc<RecordingSink>) -> (ReminderScheduler, Arc<ReminderStore>) {
        let start = chrono::DateTime::parse_from_rfc3339("2026-10-18T08:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let clock = Arc::new(TokioClock::starting_at(start));
        let store = Arc::new(ReminderStore::open_in_memory_with_clock(clock).unwrap());
        let scheduler = ReminderScheduler::new(store.clone(), sink, &SchedulerConfig::default());
        (scheduler, store)
    }

    async fn sleep_minutes(m: u64) {
        tokio::time::sleep(Duration::from_secs(m * 60)).await;
    }

    fn ts(t: chrono::DateTime<chrono::Utc>) -> String {
        t.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_arms_timer_and_persists() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, store) = setup(sink);

        let id = scheduler.create_reminder(1, 30, "  Drink water ").await.unwrap();
        let r = store.get(id).unwrap().unwrap();
        assert_eq!(r.status, ReminderStatus::Active);
        assert_eq!(r.message, "Drink water");
        assert_eq!(r.next_trigger_at, Some(r.created_at + chrono::Duration::minutes(30)));
        assert!(scheduler.has_timer(id).await);

        let history = store.history(id, 10).unwrap();
        assert_eq!(history[0].event, ReminderEvent::Created);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_rejects_bad_input() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, store) = setup(sink);

        for interval in [0, -5, MAX_INTERVAL_MINUTES + 1, 1_000_000_000_000, i64::MAX] {
            let err = scheduler.create_reminder(1, interval, "x").await.unwrap_err();
            assert!(matches!(err, PiBotError::Validation(_)));
        }
        let err = scheduler.create_reminder(1, 10, "   ").await.unwrap_err();
        assert!(matches!(err, PiBotError::Validation(_)));

        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(scheduler.active_timer_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_upper_bound() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, store) = setup(sink);

        let id = scheduler.create_reminder(1, MAX_INTERVAL_MINUTES, "yearly").await.unwrap();
        let r = store.get(id).unwrap().unwrap();
        assert_eq!(r.next_trigger_at, Some(r.created_at + chrono::Duration::days(365)));
        assert!(scheduler.has_timer(id).await);

        for interval in [MAX_INTERVAL_MINUTES + 1, 1_000_000_000_000] {
            let err = scheduler.update_interval(1, id, interval).await.unwrap_err();
            assert!(matches!(err, PiBotError::Validation(_)));
        }
        assert_eq!(store.get(id).unwrap().unwrap(), r);

        scheduler.update_interval(1, id, 1).await.unwrap();
        scheduler.update_interval(1, id, MAX_INTERVAL_MINUTES).await.unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().interval_minutes, MAX_INTERVAL_MINUTES);
        assert_eq!(scheduler.active_timer_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_per_interval() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, store) = setup(sink.clone());

        let id = scheduler.create_reminder(1, 1, "X").await.unwrap();
        let created = store.get(id).unwrap().unwrap();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(sink.sent().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.sent(), vec![(1, "🔔 Reminder: X".to_string())]);

        let r = store.get(id).unwrap().unwrap();
        assert_eq!(r.last_triggered_at, Some(created.created_at + chrono::Duration::minutes(1)));
        assert_eq!(
            r.next_trigger_at,
            created.next_trigger_at.map(|t| t + chrono::Duration::minutes(1))
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sink.sent().len(), 2);
        assert!(scheduler.has_timer(id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_then_resume_waits_full_interval() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, store) = setup(sink.clone());

        let id = scheduler.create_reminder(1, 10, "stretch").await.unwrap();
        sleep_minutes(5).await;
        scheduler.pause_reminder(1, id).await.unwrap();
        assert!(!scheduler.has_timer(id).await);
        assert_eq!(store.get(id).unwrap().unwrap().status, ReminderStatus::Paused);
        assert!(scheduler.list_reminders(1).unwrap().is_empty());

        sleep_minutes(30).await;
        assert!(sink.sent().is_empty());

        scheduler.resume_reminder(1, id).await.unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().status, ReminderStatus::Active);

        sleep_minutes(9).await;
        assert!(sink.sent().is_empty());
        sleep_minutes(2).await;
        assert_eq!(sink.sent().len(), 1);

        let events: Vec<ReminderEvent> = store.history(id, 10).unwrap().into_iter().map(|h| h.event).collect();
        assert_eq!(
            events,
            vec![
                ReminderEvent::Triggered,
                ReminderEvent::Resumed,
                ReminderEvent::Paused,
                ReminderEvent::Created
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_chat_and_missing_ids_are_not_found() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, store) = setup(sink);
        let id = scheduler.create_reminder(1, 10, "mine").await.unwrap();
        let before = store.get(id).unwrap().unwrap();

        for target in [id, 999] {
            assert!(matches!(scheduler.pause_reminder(2, target).await, Err(PiBotError::NotFound)));
            assert!(matches!(scheduler.resume_reminder(2, target).await, Err(PiBotError::NotFound)));
            assert!(matches!(scheduler.delete_reminder(2, target).await, Err(PiBotError::NotFound)));
            assert!(matches!(scheduler.update_interval(2, target, 5).await, Err(PiBotError::NotFound)));
            assert!(matches!(scheduler.reminder_history(2, target, 5).await, Err(PiBotError::NotFound)));
        }

        assert_eq!(store.get(id).unwrap().unwrap(), before);
        assert!(scheduler.has_timer(id).await);
        assert!(scheduler.list_reminders(2).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_stops_timer_and_removes_row() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, store) = setup(sink.clone());
        let id = scheduler.create_reminder(1, 1, "gone").await.unwrap();

        scheduler.delete_reminder(1, id).await.unwrap();
        assert!(store.get(id).unwrap().is_none());
        assert!(!scheduler.has_timer(id).await);

        sleep_minutes(5).await;
        assert!(sink.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delete_keeps_reminder_running() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, store) = setup(sink.clone());
        let id = scheduler.create_reminder(1, 1, "sticky").await.unwrap();
        store
            .execute_raw(
                "CREATE TRIGGER deny_delete BEFORE DELETE ON reminders
                 BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END",
                [],
            )
            .unwrap();

        let err = scheduler.delete_reminder(1, id).await.unwrap_err();
        assert!(matches!(err, PiBotError::Persistence(_)));
        assert_eq!(store.get(id).unwrap().unwrap().status, ReminderStatus::Active);
        assert!(scheduler.has_timer(id).await);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_resume_stays_paused() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, store) = setup(sink.clone());
        let id = scheduler.create_reminder(1, 1, "asleep").await.unwrap();
        scheduler.pause_reminder(1, id).await.unwrap();
        store
            .execute_raw(
                "CREATE TRIGGER deny_update BEFORE UPDATE ON reminders
                 BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END",
                [],
            )
            .unwrap();

        let err = scheduler.resume_reminder(1, id).await.unwrap_err();
        assert!(matches!(err, PiBotError::Persistence(_)));
        assert_eq!(store.get(id).unwrap().unwrap().status, ReminderStatus::Paused);
        assert!(!scheduler.has_timer(id).await);

        sleep_minutes(5).await;
        assert!(sink.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_update_interval_keeps_old_schedule() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, store) = setup(sink.clone());
        let id = scheduler.create_reminder(1, 1, "steady").await.unwrap();
        let before = store.get(id).unwrap().unwrap();
        store
            .execute_raw(
                "CREATE TRIGGER deny_interval BEFORE UPDATE OF interval ON reminders
                 BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END",
                [],
            )
            .unwrap();

        let err = scheduler.update_interval(1, id, 30).await.unwrap_err();
        assert!(matches!(err, PiBotError::Persistence(_)));
        assert_eq!(store.get(id).unwrap().unwrap(), before);
        assert!(scheduler.has_timer(id).await);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(sink.sent().len(), 1);

        store.delete(id).unwrap();
        assert!(matches!(scheduler.update_interval(1, id, 30).await, Err(PiBotError::NotFound)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_interval_restarts_timer() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, store) = setup(sink.clone());
        let id = scheduler.create_reminder(1, 60, "slow").await.unwrap();

        sleep_minutes(10).await;
        scheduler.update_interval(1, id, 5).await.unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().interval_minutes, 5);

        sleep_minutes(4).await;
        assert!(sink.sent().is_empty());
        sleep_minutes(2).await;
        assert_eq!(sink.sent().len(), 1);
        assert_eq!(scheduler.active_timer_count().await, 1);

        let err = scheduler.update_interval(1, id, 0).await.unwrap_err();
        assert!(matches!(err, PiBotError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_interval_keeps_paused_reminder_paused() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, store) = setup(sink.clone());
        let id = scheduler.create_reminder(1, 60, "later").await.unwrap();
        scheduler.pause_reminder(1, id).await.unwrap();

        scheduler.update_interval(1, id, 1).await.unwrap();
        assert!(!scheduler.has_timer(id).await);
        assert_eq!(store.get(id).unwrap().unwrap().status, ReminderStatus::Paused);

        sleep_minutes(5).await;
        assert!(sink.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_twice_keeps_one_timer_per_reminder() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, store) = setup(sink.clone());
        store.create(1, DEFAULT_KIND, 60, "a").unwrap();
        store.create(2, DEFAULT_KIND, 60, "b").unwrap();
        let paused = store.create(3, DEFAULT_KIND, 60, "c").unwrap();
        store.update_status(paused.id, ReminderStatus::Paused).unwrap();

        assert_eq!(scheduler.recover_active_reminders().await.unwrap().len(), 2);
        assert_eq!(scheduler.recover_active_reminders().await.unwrap().len(), 2);
        assert_eq!(scheduler.active_timer_count().await, 2);
        assert!(!scheduler.has_timer(paused.id).await);

        sleep_minutes(61).await;
        let mut chats: Vec<i64> = sink.sent().into_iter().map(|(chat, _)| chat).collect();
        chats.sort();
        assert_eq!(chats, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_past_due_waits_full_interval() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, store) = setup(sink.clone());
        let now = store.clock().now();
        store
            .execute_raw(
                "INSERT INTO reminders (chat_id, type, interval, status, message, created_at, last_triggered)
                 VALUES (1, 'custom', 60, 'active', 'late', ?1, ?2)",
                [ts(now - chrono::Duration::minutes(200)), ts(now - chrono::Duration::minutes(180))],
            )
            .unwrap();

        let recovered = scheduler.recover_active_reminders().await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].delay, Duration::from_secs(60 * 60));
        assert_eq!(
            store.get(recovered[0].id).unwrap().unwrap().next_trigger_at,
            Some(now + chrono::Duration::minutes(60))
        );

        sleep_minutes(59).await;
        assert!(sink.sent().is_empty());
        sleep_minutes(2).await;
        assert_eq!(sink.sent(), vec![(1, "🔔 Reminder: late".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_future_due_waits_remaining_time() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, store) = setup(sink.clone());
        let r = store.create(1, DEFAULT_KIND, 60, "soon").unwrap();
        store
            .set_next_trigger(r.id, store.clock().now() + chrono::Duration::minutes(5))
            .unwrap();

        let recovered = scheduler.recover_active_reminders().await.unwrap();
        assert_eq!(recovered[0].delay, Duration::from_secs(5 * 60));

        sleep_minutes(4).await;
        assert!(sink.sent().is_empty());
        sleep_minutes(2).await;
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_racing_trigger_sends_nothing_after_pause() {
        let sink = Arc::new(RecordingSink::gated());
        let (scheduler, store) = setup(sink.clone());
        let id = scheduler.create_reminder(1, 1, "race").await.unwrap();

        // Trigger is now inside its critical section, blocked in `send`.
        tokio::time::sleep(Duration::from_secs(60)).await;
        sink.entered.notified().await;

        let pausing = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.pause_reminder(1, id).await })
        };
        tokio::task::yield_now().await;
        assert!(!pausing.is_finished());

        sink.release();
        pausing.await.unwrap().unwrap();

        assert_eq!(store.get(id).unwrap().unwrap().status, ReminderStatus::Paused);
        assert!(sink.sent().len() <= 1);
        let delivered = sink.sent().len();

        sleep_minutes(10).await;
        assert_eq!(sink.sent().len(), delivered);
        assert!(!scheduler.has_timer(id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_sink_keeps_schedule() {
        let sink = Arc::new(RecordingSink::failing());
        let (scheduler, store) = setup(sink);
        let id = scheduler.create_reminder(1, 1, "unheard").await.unwrap();

        tokio::time::sleep(Duration::from_secs(121)).await;
        let r = store.get(id).unwrap().unwrap();
        assert_eq!(r.status, ReminderStatus::Active);
        assert!(r.last_triggered_at.is_some());

        let triggered = store
            .history(id, 10)
            .unwrap()
            .into_iter()
            .filter(|h| h.event == ReminderEvent::Triggered)
            .count();
        assert_eq!(triggered, 2);
        assert!(scheduler.has_timer(id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_stops_when_row_disappears() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, store) = setup(sink.clone());
        let id = scheduler.create_reminder(1, 1, "orphan").await.unwrap();

        store.delete(id).unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(sink.sent().is_empty());
        assert!(!scheduler.has_timer(id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_all_timers() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, store) = setup(sink.clone());
        scheduler.create_reminder(1, 1, "a").await.unwrap();
        scheduler.create_reminder(2, 1, "b").await.unwrap();

        scheduler.shutdown().await;
        assert_eq!(scheduler.active_timer_count().await, 0);

        sleep_minutes(3).await;
        assert!(sink.sent().is_empty());
        assert_eq!(store.list_all_active().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_and_listing() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, _store) = setup(sink);
        let a = scheduler.create_reminder(1, 30, "a").await.unwrap();
        let b = scheduler
            .create_reminder_with_kind(1, "water", 120, "b")
            .await
            .unwrap();
        scheduler.pause_reminder(1, b).await.unwrap();

        let active: Vec<i64> = scheduler.list_reminders(1).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(active, vec![a]);
        let all = scheduler.list_all_reminders(1).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().find(|r| r.id == b).unwrap().kind, "water");

        let history = scheduler.reminder_history(1, b, 1).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event, ReminderEvent::Paused);
    }
}
