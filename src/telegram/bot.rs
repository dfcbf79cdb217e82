//! Bot instance creation and the command table.

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

/// Bot commands with descriptions shown in the Telegram UI.
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "start the bot and show usage")]
    Start,
    #[command(description = "show this help text")]
    Help,
    #[command(description = "your profile and usage counters")]
    Profile,
    #[command(description = "your recent downloads")]
    Mydownloads,
    #[command(description = "your personal statistics")]
    Stats,
    #[command(description = "ban a user (admin only)")]
    Ban(String),
    #[command(description = "lift a ban (admin only)")]
    Unban(String),
    #[command(description = "queue a broadcast to all users (admin only)")]
    Broadcast(String),
    #[command(description = "notify a user: <id> <text> (admin only)")]
    Notify(String),
    #[command(description = "global statistics (admin only)")]
    Gstats,
}

/// Create the bot from TELOXIDE_TOKEN.
pub fn create_bot() -> Bot {
    Bot::from_env()
}

/// Register the user-facing half of the command table in the Telegram UI.
/// Admin commands stay unlisted.
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    use teloxide::types::BotCommand;

    bot.set_my_commands(vec![
        BotCommand::new("start", "start the bot and show usage"),
        BotCommand::new("help", "show help text"),
        BotCommand::new("profile", "your profile and usage counters"),
        BotCommand::new("mydownloads", "your recent downloads"),
        BotCommand::new("stats", "your personal statistics"),
    ])
    .await?;
    Ok(())
}
