//! Admin commands: moderation, broadcasts, notifications, global stats.
//!
//! Authorization is the union of the ADMIN_IDS environment list and the
//! `is_admin` flag in the database. Every state-changing action lands in the
//! `admin_logs` audit table.

use crate::core::config;
use crate::storage::db;
use crate::telegram::handlers::HandlerDeps;
use teloxide::prelude::*;

/// Whether this user may run admin commands.
pub fn is_authorized(deps: &HandlerDeps, user_id: i64) -> bool {
    if config::ADMIN_IDS.contains(&user_id) {
        return true;
    }
    db::get_connection(&deps.pool)
        .ok()
        .and_then(|conn| db::is_admin(&conn, user_id).ok())
        .unwrap_or(false)
}

/// Reject unauthorized callers with a uniform message.
async fn require_admin(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> ResponseResult<bool> {
    if is_authorized(deps, msg.chat.id.0) {
        return Ok(true);
    }
    bot.send_message(msg.chat.id, "This command is for administrators only.").await?;
    Ok(false)
}

fn parse_user_id(arg: &str) -> Option<i64> {
    arg.trim().parse().ok()
}

fn audit(deps: &HandlerDeps, admin_id: i64, action: &str, target: Option<i64>, details: &str) {
    let Ok(conn) = db::get_connection(&deps.pool) else {
        log::error!("Failed to get database connection for audit log");
        return;
    };
    if let Err(e) = db::log_admin_action(&conn, admin_id, action, target, details) {
        log::error!("Failed to write admin log: {}", e);
    }
}

pub async fn handle_ban(bot: &Bot, msg: &Message, deps: &HandlerDeps, arg: &str) -> ResponseResult<()> {
    if !require_admin(bot, msg, deps).await? {
        return Ok(());
    }
    let Some(target) = parse_user_id(arg) else {
        bot.send_message(msg.chat.id, "Usage: /ban <user_id>").await?;
        return Ok(());
    };
    match db::get_connection(&deps.pool).ok().map(|conn| db::ban_user(&conn, target)) {
        Some(Ok(())) => {
            audit(deps, msg.chat.id.0, "ban", Some(target), "");
            log::info!("User {} banned by {}", target, msg.chat.id.0);
            bot.send_message(msg.chat.id, format!("User {} banned.", target)).await?;
        }
        _ => {
            bot.send_message(msg.chat.id, "Failed to ban user.").await?;
        }
    }
    Ok(())
}

pub async fn handle_unban(bot: &Bot, msg: &Message, deps: &HandlerDeps, arg: &str) -> ResponseResult<()> {
    if !require_admin(bot, msg, deps).await? {
        return Ok(());
    }
    let Some(target) = parse_user_id(arg) else {
        bot.send_message(msg.chat.id, "Usage: /unban <user_id>").await?;
        return Ok(());
    };
    match db::get_connection(&deps.pool).ok().map(|conn| db::unban_user(&conn, target)) {
        Some(Ok(())) => {
            audit(deps, msg.chat.id.0, "unban", Some(target), "");
            bot.send_message(msg.chat.id, format!("User {} unbanned.", target)).await?;
        }
        _ => {
            bot.send_message(msg.chat.id, "Failed to unban user.").await?;
        }
    }
    Ok(())
}

/// Queue a broadcast; the scheduler delivers it on its next tick.
pub async fn handle_broadcast(bot: &Bot, msg: &Message, deps: &HandlerDeps, text: &str) -> ResponseResult<()> {
    if !require_admin(bot, msg, deps).await? {
        return Ok(());
    }
    let text = text.trim();
    if text.is_empty() {
        bot.send_message(msg.chat.id, "Usage: /broadcast <message>").await?;
        return Ok(());
    }
    match db::get_connection(&deps.pool)
        .ok()
        .map(|conn| db::queue_broadcast(&conn, msg.chat.id.0, text))
    {
        Some(Ok(id)) => {
            audit(deps, msg.chat.id.0, "broadcast", None, text);
            bot.send_message(
                msg.chat.id,
                format!("Broadcast #{} queued; it goes out within a minute.", id),
            )
            .await?;
        }
        _ => {
            bot.send_message(msg.chat.id, "Failed to queue broadcast.").await?;
        }
    }
    Ok(())
}

/// `/notify <user_id> <text>`: store a notification and ping the user.
pub async fn handle_notify(bot: &Bot, msg: &Message, deps: &HandlerDeps, arg: &str) -> ResponseResult<()> {
    if !require_admin(bot, msg, deps).await? {
        return Ok(());
    }
    let mut parts = arg.trim().splitn(2, char::is_whitespace);
    let target = parts.next().and_then(parse_user_id);
    let text = parts.next().map(str::trim).filter(|t| !t.is_empty());
    let (Some(target), Some(text)) = (target, text) else {
        bot.send_message(msg.chat.id, "Usage: /notify <user_id> <message>").await?;
        return Ok(());
    };

    match db::get_connection(&deps.pool)
        .ok()
        .map(|conn| db::add_notification(&conn, target, text, "admin"))
    {
        Some(Ok(_)) => {
            audit(deps, msg.chat.id.0, "notify", Some(target), text);
            if let Err(e) = bot.send_message(ChatId(target), text).await {
                log::warn!("Could not deliver notification to {}: {}", target, e);
            }
            bot.send_message(msg.chat.id, "Notification sent.").await?;
        }
        _ => {
            bot.send_message(msg.chat.id, "Failed to store notification.").await?;
        }
    }
    Ok(())
}

pub async fn handle_gstats(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> ResponseResult<()> {
    if !require_admin(bot, msg, deps).await? {
        return Ok(());
    }
    let stats = db::get_connection(&deps.pool)
        .ok()
        .and_then(|conn| db::get_statistics(&conn).ok());
    let text = match stats {
        Some(s) => format!(
            "Global statistics\n\nUsers: {} ({} active today)\nDownloads: {} ok / {} failed\n\
             Storage delivered: {:.1} MB\nAverage download time: {:.1}s",
            s.total_users,
            s.active_users,
            s.successful_downloads,
            s.failed_downloads,
            s.total_storage_used as f64 / 1_048_576.0,
            s.avg_download_seconds
        ),
        None => "Statistics are unavailable right now.".to_string(),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}
