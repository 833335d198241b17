//! Bot run loop: Telegram polling → command layer → reply.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use pibot_channels::TelegramChannel;
use pibot_core::PiBotConfig;
use pibot_core::traits::{Channel, NotificationSink};
use pibot_core::types::OutgoingMessage;
use pibot_monitor::Monitor;
use pibot_scheduler::{RecoveredReminder, ReminderScheduler, ReminderStore};

use crate::commands::CommandLayer;

const ONLINE: &str = "🤖 Bot is now online and ready!";
const SHUTTING_DOWN: &str = "🔴 Bot is shutting down. Reminders will resume when bot is back online.";

fn recovery_notice(r: &RecoveredReminder) -> String {
    format!(
        "🔄 Bot has restarted!\n✅ Your reminder has been automatically recovered:\nType: {}\nMessage: {}\nInterval: Every {} minutes",
        r.kind, r.message, r.interval_minutes
    )
}

/// Send `text` to every user, logging failures.
async fn broadcast(sink: &dyn NotificationSink, users: &[i64], text: &str) {
    for &user in users {
        if let Err(e) = sink.send(user, text).await {
            tracing::warn!("Failed to notify user {user}: {e}");
        }
    }
}

/// Connect to Telegram, recover reminders, and serve commands until Ctrl-C.
pub async fn run(config: PiBotConfig, store: Arc<ReminderStore>) -> Result<()> {
    let mut channel = TelegramChannel::new(config.telegram.clone())?;
    channel.connect().await?;

    let sink: Arc<dyn NotificationSink> = Arc::new(channel.clone());
    let scheduler = ReminderScheduler::new(store, sink.clone(), &config.scheduler);

    tracing::info!("♻️ Starting reminder recovery...");
    match scheduler.recover_active_reminders().await {
        Ok(recovered) => {
            tracing::info!("Reminder recovery completed: {} active reminders", recovered.len());
            if config.notifications.announce_recovery {
                for r in &recovered {
                    if let Err(e) = sink.send(r.chat_id, &recovery_notice(r)).await {
                        tracing::warn!("Failed to send recovery notice for reminder {}: {e}", r.id);
                    }
                }
            }
        }
        Err(e) => tracing::warn!("Failed to recover reminders: {e}"),
    }

    let allowed = config.telegram.allowed_user_ids.clone();
    let commands = Arc::new(CommandLayer::new(
        scheduler.clone(),
        Arc::new(Monitor::new()),
        &allowed,
    ));

    if config.notifications.announce_startup {
        broadcast(sink.as_ref(), &allowed, ONLINE).await;
    }

    let mut updates = channel.clone().start_polling();
    let replies = Arc::new(channel);
    tracing::info!("🚀 PiBot running, {} allowed users", allowed.len());

    loop {
        tokio::select! {
            incoming = updates.next() => {
                let Some(msg) = incoming else {
                    tracing::error!("Telegram update stream ended");
                    break;
                };
                let commands = Arc::clone(&commands);
                let replies = Arc::clone(&replies);
                tokio::spawn(async move {
                    let reply: OutgoingMessage = commands.handle(&msg).await;
                    if let Err(e) = Channel::send(replies.as_ref(), reply).await {
                        tracing::warn!("Failed to reply in chat {}: {e}", msg.chat_id);
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    scheduler.shutdown().await;
    if config.notifications.announce_startup {
        broadcast(sink.as_ref(), &allowed, SHUTTING_DOWN).await;
    }
    Ok(())
}
