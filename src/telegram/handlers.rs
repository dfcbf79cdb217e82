//! Message and command handlers.
//!
//! The link handler is the main user path: validate, record, orchestrate the
//! download, deliver the artifacts, then clean up. Database failures on this
//! path are logged but never block a delivery.

use crate::core::{config, validation};
use crate::download::{DownloadEngine, DownloadOutcome, DownloadRequest, RequestedKind};
use crate::storage::db::{self, DbPool};
use crate::telegram::admin;
use crate::telegram::bot::Command;
use std::path::Path;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::InputFile;
use teloxide::utils::command::BotCommands;
use tokio_util::sync::CancellationToken;

/// Shared state handed to every handler invocation.
#[derive(Clone)]
pub struct HandlerDeps {
    pub pool: Arc<DbPool>,
    pub engine: Arc<DownloadEngine>,
    /// Cancelled on shutdown; in-flight downloads stop at their next
    /// attempt boundary
    pub shutdown: CancellationToken,
}

/// Make sure the sender exists in the database and bump their activity.
fn register_user(pool: &DbPool, msg: &Message) {
    let Ok(conn) = db::get_connection(pool) else {
        log::error!("Failed to get database connection");
        return;
    };
    let user_id = msg.chat.id.0;
    let (username, first_name) = msg
        .from
        .as_ref()
        .map(|u| (u.username.as_deref(), Some(u.first_name.as_str())))
        .unwrap_or((None, None));
    if let Err(e) = db::upsert_user(&conn, user_id, username, first_name) {
        log::error!("Failed to upsert user {}: {}", user_id, e);
    }
    if let Err(e) = db::touch_activity(&conn, user_id) {
        log::warn!("Failed to touch activity for {}: {}", user_id, e);
    }
}

/// Dispatch one parsed command.
pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    deps: HandlerDeps,
) -> ResponseResult<()> {
    register_user(&deps.pool, &msg);
    let chat_id = msg.chat.id;
    let user_id = chat_id.0;

    match cmd {
        Command::Start => {
            bot.send_message(
                chat_id,
                "Send me a link from TikTok, Instagram, YouTube or Twitter/X \
                 and I'll fetch the video and its audio track for you.",
            )
            .await?;
        }
        Command::Help => {
            bot.send_message(chat_id, Command::descriptions().to_string()).await?;
        }
        Command::Profile => {
            let text = match db::get_connection(&deps.pool)
                .ok()
                .and_then(|conn| db::get_user(&conn, user_id).ok().flatten())
            {
                Some(user) => format!(
                    "Your profile\n\nDownloads: {}\nStorage delivered: {:.1} MB\nJoined: {}",
                    user.downloads_count,
                    user.storage_used as f64 / 1_048_576.0,
                    user.join_date
                ),
                None => "No profile yet. Send a link to get started.".to_string(),
            };
            bot.send_message(chat_id, text).await?;
        }
        Command::Mydownloads => {
            let history = db::get_connection(&deps.pool)
                .ok()
                .and_then(|conn| db::get_user_downloads(&conn, user_id, 10).ok())
                .unwrap_or_default();
            let text = if history.is_empty() {
                "No downloads yet.".to_string()
            } else {
                let mut lines = vec!["Your recent downloads:".to_string()];
                for d in history {
                    lines.push(format!(
                        "• [{}] {} - {}",
                        d.status,
                        d.title.as_deref().unwrap_or("untitled"),
                        d.url
                    ));
                }
                lines.join("\n")
            };
            bot.send_message(chat_id, text).await?;
        }
        Command::Stats => {
            let text = match db::get_connection(&deps.pool)
                .ok()
                .and_then(|conn| db::get_user(&conn, user_id).ok().flatten())
            {
                Some(user) => format!(
                    "Downloads completed: {}\nTotal delivered: {:.1} MB\nLast activity: {}",
                    user.downloads_count,
                    user.storage_used as f64 / 1_048_576.0,
                    user.last_activity
                ),
                None => "No statistics yet.".to_string(),
            };
            bot.send_message(chat_id, text).await?;
        }
        Command::Ban(arg) => admin::handle_ban(&bot, &msg, &deps, &arg).await?,
        Command::Unban(arg) => admin::handle_unban(&bot, &msg, &deps, &arg).await?,
        Command::Broadcast(text) => admin::handle_broadcast(&bot, &msg, &deps, &text).await?,
        Command::Notify(arg) => admin::handle_notify(&bot, &msg, &deps, &arg).await?,
        Command::Gstats => admin::handle_gstats(&bot, &msg, &deps).await?,
    }
    Ok(())
}

/// The link path: any plain text message that parses as a supported URL.
pub async fn handle_message(bot: Bot, msg: Message, deps: HandlerDeps) -> ResponseResult<()> {
    let Some(text) = msg.text() else { return Ok(()) };
    let chat_id = msg.chat.id;
    let user_id = chat_id.0;

    let url = match validation::parse_supported_url(text) {
        Ok(url) => url,
        Err(e) => {
            // only complain when the user clearly tried to send a link
            if text.starts_with("http://") || text.starts_with("https://") {
                bot.send_message(chat_id, format!("Sorry, I can't handle that link: {}", e))
                    .await?;
            }
            return Ok(());
        }
    };

    register_user(&deps.pool, &msg);

    let banned = db::get_connection(&deps.pool)
        .ok()
        .and_then(|conn| db::is_banned(&conn, user_id).ok())
        .unwrap_or(false);
    if banned {
        bot.send_message(chat_id, "You are banned from using this bot.").await?;
        return Ok(());
    }

    let download_id = db::get_connection(&deps.pool)
        .ok()
        .and_then(|conn| db::log_download(&conn, user_id, url.as_str(), "combined").ok());

    bot.send_message(chat_id, "Downloading, this can take a minute…").await?;

    let request = DownloadRequest {
        url,
        chat_id: user_id,
        kind: RequestedKind::Combined,
    };

    match deps.engine.download(&request, &deps.shutdown).await {
        Ok(outcome) => {
            // hold on to the delivery result: the workspace must be
            // reclaimed and the outcome recorded even when a send fails
            let delivery = deliver_artifacts(&bot, chat_id, &outcome).await;
            if let (Some(id), Ok(conn)) = (download_id, db::get_connection(&deps.pool)) {
                let recorded = match &delivery {
                    Ok(delivered) => db::complete_download(&conn, id, &outcome.title, *delivered as i64),
                    Err(e) => db::fail_download(&conn, id, &format!("delivery failed: {}", e)),
                };
                if let Err(e) = recorded {
                    log::error!("Failed to record download {}: {}", id, e);
                }
            }
            outcome.workspace.release();
            delivery?;
        }
        Err(e) => {
            log::warn!("Download failed for {}: {}", user_id, e);
            if let (Some(id), Ok(conn)) = (download_id, db::get_connection(&deps.pool)) {
                if let Err(e) = db::fail_download(&conn, id, &e.to_string()) {
                    log::error!("Failed to record failed download {}: {}", id, e);
                }
            }
            bot.send_message(chat_id, format!("Download failed: {}", e.user_excerpt()))
                .await?;
        }
    }
    Ok(())
}

/// Send every artifact the engine produced, honoring the upload size guard.
/// Returns total bytes delivered.
async fn deliver_artifacts(
    bot: &Bot,
    chat_id: ChatId,
    outcome: &DownloadOutcome,
) -> ResponseResult<u64> {
    let mut delivered = 0u64;

    if let Some(video) = &outcome.artifacts.video {
        match guarded_size(video).await {
            Some(size) => {
                bot.send_video(chat_id, InputFile::file(video))
                    .caption(outcome.title.clone())
                    .await?;
                delivered += size;
            }
            None => {
                bot.send_message(chat_id, "The video is too large to send.").await?;
            }
        }
    }
    if let Some(audio) = &outcome.artifacts.audio {
        match guarded_size(audio).await {
            Some(size) => {
                bot.send_audio(chat_id, InputFile::file(audio))
                    .caption(outcome.title.clone())
                    .await?;
                delivered += size;
            }
            None => {
                bot.send_message(chat_id, "The audio track is too large to send.").await?;
            }
        }
    }
    if let Some(gif) = &outcome.artifacts.gif {
        if let Some(size) = guarded_size(gif).await {
            bot.send_animation(chat_id, InputFile::file(gif)).await?;
            delivered += size;
        }
    }
    if let Some(image) = &outcome.artifacts.image {
        if let Some(size) = guarded_size(image).await {
            bot.send_photo(chat_id, InputFile::file(image)).await?;
            delivered += size;
        }
    }

    Ok(delivered)
}

/// File size if it is within the upload limit, None if oversized or unreadable.
async fn guarded_size(path: &Path) -> Option<u64> {
    let size = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) => {
            log::error!("Cannot stat artifact {}: {}", path.display(), e);
            return None;
        }
    };
    let limit = *config::MAX_UPLOAD_BYTES;
    if limit > 0 && size > limit {
        log::warn!("Artifact {} exceeds upload limit ({} bytes)", path.display(), size);
        return None;
    }
    Some(size)
}
