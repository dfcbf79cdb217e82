//! Background tasks: the broadcast scheduler and the stale-workspace sweeper.

use crate::core::config;
use crate::storage::db::{self, DbPool};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;

/// Spawn both background loops; they run until `shutdown` is cancelled.
pub fn spawn_background_tasks(bot: Bot, pool: Arc<DbPool>, shutdown: CancellationToken) {
    tokio::spawn(broadcast_scheduler(bot, pool, shutdown.clone()));
    tokio::spawn(workspace_sweeper(config::DATA_DIR.clone(), shutdown));
}

/// Drain queued broadcasts to every unbanned user once a minute.
pub async fn broadcast_scheduler(bot: Bot, pool: Arc<DbPool>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(config::tasks::broadcast_interval());
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                log::info!("Broadcast scheduler shutting down");
                return;
            }
            _ = ticker.tick() => {}
        }

        let (pending, recipients) = {
            let Ok(conn) = db::get_connection(&pool) else {
                log::error!("Broadcast scheduler: no database connection");
                continue;
            };
            let pending = db::pending_broadcasts(&conn, 10).unwrap_or_else(|e| {
                log::error!("Failed to read pending broadcasts: {}", e);
                Vec::new()
            });
            if pending.is_empty() {
                continue;
            }
            let recipients = db::get_all_users(&conn, false).unwrap_or_else(|e| {
                log::error!("Failed to list broadcast recipients: {}", e);
                Vec::new()
            });
            (pending, recipients)
        };

        for message in pending {
            let mut sent = 0i64;
            let mut failed = 0i64;
            for user in &recipients {
                match bot.send_message(ChatId(user.user_id), message.message_text.clone()).await {
                    Ok(_) => sent += 1,
                    Err(e) => {
                        // blocked bots and deleted accounts end up here
                        log::debug!("Broadcast to {} failed: {}", user.user_id, e);
                        failed += 1;
                    }
                }
            }
            log::info!("Broadcast #{} delivered: {} sent, {} failed", message.id, sent, failed);
            if let Ok(conn) = db::get_connection(&pool) {
                if let Err(e) = db::update_broadcast_status(&conn, message.id, sent, failed) {
                    log::error!("Failed to update broadcast #{}: {}", message.id, e);
                }
            }
        }
    }
}

/// Remove attempt directories older than the configured age, hourly.
/// Chat roots themselves are never removed.
pub async fn workspace_sweeper(data_dir: std::path::PathBuf, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(config::tasks::sweep_interval());
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                log::info!("Workspace sweeper shutting down");
                return;
            }
            _ = ticker.tick() => {}
        }

        match sweep_once(&data_dir, config::tasks::stale_workspace_age()) {
            Ok(0) => {}
            Ok(n) => log::info!("Swept {} stale workspace directories", n),
            Err(e) => log::warn!("Workspace sweep failed: {}", e),
        }
    }
}

/// One sweep pass. Returns the number of directories removed.
pub fn sweep_once(data_dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    let mut removed = 0;
    let now = SystemTime::now();

    let Ok(chats) = std::fs::read_dir(data_dir) else {
        // data dir not created yet; nothing to sweep
        return Ok(0);
    };

    for chat in chats.flatten() {
        let chat_path = chat.path();
        if !chat_path.is_dir() {
            continue;
        }
        for attempt in std::fs::read_dir(&chat_path)?.flatten() {
            let attempt_path = attempt.path();
            if !attempt_path.is_dir() {
                continue;
            }
            let modified = attempt.metadata().and_then(|m| m.modified());
            let stale = match modified {
                Ok(t) => now.duration_since(t).map(|age| age > max_age).unwrap_or(false),
                Err(_) => false,
            };
            if stale {
                match std::fs::remove_dir_all(&attempt_path) {
                    Ok(()) => removed += 1,
                    Err(e) => log::warn!("Could not remove {}: {}", attempt_path.display(), e),
                }
            }
        }
    }
    Ok(removed)
}
