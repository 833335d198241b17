//! Chat command layer: authorization, argument parsing, and replies.

use std::collections::HashSet;
use std::sync::Arc;

use pibot_core::error::{PiBotError, Result};
use pibot_core::types::{IncomingMessage, OutgoingMessage};
use pibot_monitor::HostMonitor;
use pibot_scheduler::ReminderScheduler;

/// Interval used by the quick reminder commands.
const QUICK_REMINDER_MINUTES: i64 = 120;
const HISTORY_LIMIT: usize = 10;

pub const UNAUTHORIZED: &str = "❌ You are not authorized to use this bot.";
pub const UNKNOWN_COMMAND: &str = "Unknown command. Use /help to see available commands.";

const HELP_TEXT: &str = r#"<b>Bot Commands Guide</b>

<b>📊 System Monitoring</b>
• /help - Show this help message
• /status - Show CPU and RAM usage
• /temp - Show CPU temperature
• /uptime - Show system uptime
• /top - Show top 5 processes
• /disk - Show disk usage
• /network_details - Show network details
• /reboot - Reboot the system

<b>⏰ Reminder Commands</b>

<b>Create New Reminder:</b>
/reminder_create &lt;interval&gt; &lt;message&gt;

<b>Examples:</b>
• /reminder_create 120 "Drink water! 💧"
• /reminder_create 360 "Take medicine! 💊"

<b>Manage Reminders:</b>
• /reminder_list - Show active reminders
• /reminder_list all - Include paused reminders
• /reminder_pause &lt;id&gt; - Pause a reminder
• /reminder_resume &lt;id&gt; - Resume a reminder
• /reminder_delete &lt;id&gt; - Delete a reminder
• /reminder_interval &lt;id&gt; &lt;minutes&gt; - Change the interval
• /reminder_history &lt;id&gt; - Show recent events

<b>Quick Reminders:</b>
• /reminder_eye_drop - Start eye drops (2h)
• /reminder_water - Start water (2h)

<b>💡 Tips:</b>
• Intervals are in minutes
• Use quotes for messages with spaces
• Use /reminder_list to get reminder IDs"#;

/// Routes chat commands to the scheduler and the host monitor.
pub struct CommandLayer {
    scheduler: ReminderScheduler,
    monitor: Arc<dyn HostMonitor>,
    allowed_users: HashSet<i64>,
}

impl CommandLayer {
    pub fn new(scheduler: ReminderScheduler, monitor: Arc<dyn HostMonitor>, allowed_users: &[i64]) -> Self {
        Self {
            scheduler,
            monitor,
            allowed_users: allowed_users.iter().copied().collect(),
        }
    }

    pub fn is_authorized(&self, user_id: i64) -> bool {
        self.allowed_users.contains(&user_id)
    }

    /// Handle one incoming message and build the reply.
    pub async fn handle(&self, msg: &IncomingMessage) -> OutgoingMessage {
        if !self.is_authorized(msg.sender_id) {
            tracing::warn!("Rejected message from unauthorized user {}", msg.sender_id);
            return OutgoingMessage::text(msg.chat_id, UNAUTHORIZED);
        }

        let (command, args) = msg.command().unwrap_or(("", ""));
        tracing::debug!("Command /{command} from {} in chat {}", msg.sender_id, msg.chat_id);

        if matches!(command, "help" | "start") {
            return OutgoingMessage::html(msg.chat_id, HELP_TEXT);
        }

        let text = match self.dispatch(msg.chat_id, command, args).await {
            Ok(text) => text,
            Err(e) => {
                if !e.is_user_facing() {
                    tracing::error!("/{command} failed: {e}");
                }
                format!("❌ Error: {e}")
            }
        };
        OutgoingMessage::text(msg.chat_id, text)
    }

    async fn dispatch(&self, chat_id: i64, command: &str, args: &str) -> Result<String> {
        match command {
            "status" => self.monitor.system_stats().await,
            "temp" => self.monitor.temperature().await,
            "uptime" => self.monitor.uptime().await,
            "top" => self.monitor.top_processes().await,
            "disk" => self.monitor.disk_usage().await,
            "network_details" => self.monitor.network_details().await,
            "reboot" => self.monitor.reboot().await,

            "reminder_create" => {
                let (interval, message) = parse_create_args(args)?;
                let id = self.scheduler.create_reminder(chat_id, interval, &message).await?;
                Ok(format!("✅ Reminder created successfully! ID: {id}"))
            }
            "reminder_water" => {
                self.quick_reminder(chat_id, "water", "💧 Time to drink water!")
                    .await
            }
            "reminder_eye_drop" => {
                self.quick_reminder(chat_id, "eye_drop", "👁️ Time for your eye drops!")
                    .await
            }
            "reminder_list" => self.list(chat_id, args),
            "reminder_pause" => {
                let id = parse_id(args)?;
                self.scheduler.pause_reminder(chat_id, id).await?;
                Ok(format!("⏸️ Reminder {id} paused."))
            }
            "reminder_resume" => {
                let id = parse_id(args)?;
                self.scheduler.resume_reminder(chat_id, id).await?;
                Ok(format!("▶️ Reminder {id} resumed."))
            }
            "reminder_delete" => {
                let id = parse_id(args)?;
                self.scheduler.delete_reminder(chat_id, id).await?;
                Ok(format!("🗑️ Reminder {id} deleted."))
            }
            "reminder_interval" => {
                let (id, minutes) = parse_interval_args(args)?;
                self.scheduler.update_interval(chat_id, id, minutes).await?;
                Ok(format!("🔁 Reminder {id} now repeats every {minutes} minutes."))
            }
            "reminder_history" => {
                let id = parse_id(args)?;
                let history = self.scheduler.reminder_history(chat_id, id, HISTORY_LIMIT).await?;
                let mut text = format!("History for reminder {id}:\n");
                for entry in history {
                    text.push_str(&format!("{} {}\n", entry.at.format("%Y-%m-%d %H:%M UTC"), entry.event));
                }
                Ok(text)
            }

            _ => Ok(UNKNOWN_COMMAND.to_string()),
        }
    }

    async fn quick_reminder(&self, chat_id: i64, kind: &str, message: &str) -> Result<String> {
        let id = self
            .scheduler
            .create_reminder_with_kind(chat_id, kind, QUICK_REMINDER_MINUTES, message)
            .await?;
        Ok(format!(
            "✅ Reminder created successfully! ID: {id}\nEvery {QUICK_REMINDER_MINUTES} minutes: {message}"
        ))
    }

    /// `/reminder_list [all]`: active reminders, or every reminder with its status.
    fn list(&self, chat_id: i64, args: &str) -> Result<String> {
        let all = match args.trim() {
            "" => false,
            "all" => true,
            _ => return Err(PiBotError::validation("usage: /reminder_list [all]")),
        };

        let reminders = if all {
            self.scheduler.list_all_reminders(chat_id)?
        } else {
            self.scheduler.list_reminders(chat_id)?
        };
        if reminders.is_empty() {
            return Ok(if all { "No reminders." } else { "No active reminders." }.into());
        }

        let mut text = String::from(if all { "All Reminders:\n" } else { "Active Reminders:\n" });
        for r in reminders {
            text.push_str(&format!("ID: {}\nType: {}\n", r.id, r.kind));
            if all {
                text.push_str(&format!("Status: {}\n", r.status));
            }
            text.push_str(&format!(
                "Interval: {} minutes\nMessage: {}\n\n",
                r.interval_minutes, r.message
            ));
        }
        Ok(text)
    }
}

const CREATE_USAGE: &str = "not enough arguments. Usage: /reminder_create <interval> <message>";

/// `<interval> <message>`; the message may be wrapped in double quotes.
fn parse_create_args(args: &str) -> Result<(i64, String)> {
    let (interval, message) = args
        .trim()
        .split_once(char::is_whitespace)
        .ok_or_else(|| PiBotError::validation(CREATE_USAGE))?;

    let interval = interval
        .parse::<i64>()
        .map_err(|e| PiBotError::validation(format!("invalid interval: {e}")))?;

    let message = message.trim();
    let message = message
        .strip_prefix('"')
        .and_then(|m| m.strip_suffix('"'))
        .unwrap_or(message)
        .trim();
    if message.is_empty() {
        return Err(PiBotError::validation(CREATE_USAGE));
    }
    Ok((interval, message.to_string()))
}

fn parse_id(args: &str) -> Result<i64> {
    let args = args.trim();
    if args.is_empty() {
        return Err(PiBotError::validation("missing reminder ID"));
    }
    args.parse::<i64>()
        .map_err(|e| PiBotError::validation(format!("invalid reminder ID: {e}")))
}

fn parse_interval_args(args: &str) -> Result<(i64, i64)> {
    let mut parts = args.split_whitespace();
    let (Some(id), Some(minutes), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(PiBotError::validation(
            "usage: /reminder_interval <id> <minutes>",
        ));
    };
    let minutes = minutes
        .parse::<i64>()
        .map_err(|e| PiBotError::validation(format!("invalid interval: {e}")))?;
    Ok((parse_id(id)?, minutes))
}
