//! Telegram-facing surface: command table, handlers, admin panel, and the
//! background task loops.

pub mod admin;
pub mod bot;
pub mod broadcast;
pub mod handlers;

pub use bot::{create_bot, setup_bot_commands, Command};
pub use handlers::HandlerDeps;
