use anyhow::Result;
use dotenvy::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;

use klipchi::cli::{Cli, Commands};
use klipchi::core::{config, init_logger, validation};
use klipchi::download::{DownloadEngine, DownloadRequest, RequestedKind};
use klipchi::storage::create_pool;
use klipchi::telegram::handlers::{handle_command, handle_message};
use klipchi::telegram::{broadcast, create_bot, setup_bot_commands, Command, HandlerDeps};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // .env first so the Lazy config statics see it
    let _ = dotenv();
    init_logger(&config::LOG_FILE_PATH)?;

    match cli.command {
        Some(Commands::Download { url, kind, output }) => run_cli_download(url, kind, output).await,
        Some(Commands::Run) | None => run_bot().await,
    }
}

/// Long-polling bot mode.
async fn run_bot() -> Result<()> {
    log::info!("Starting klipchi bot");

    let pool = Arc::new(
        create_pool(&config::DATABASE_PATH)
            .map_err(|e| anyhow::anyhow!("Failed to create database pool: {}", e))?,
    );

    let bot = create_bot();
    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to register bot commands: {}", e);
    }

    let shutdown = CancellationToken::new();
    let deps = HandlerDeps {
        pool: pool.clone(),
        engine: Arc::new(DownloadEngine::new()),
        shutdown: shutdown.clone(),
    };

    broadcast::spawn_background_tasks(bot.clone(), pool, shutdown.clone());

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    // stop the background loops and let in-flight downloads bail out
    shutdown.cancel();
    log::info!("Bot stopped");
    Ok(())
}

/// Headless one-shot download; artifacts are copied into `output`.
async fn run_cli_download(url: String, kind: RequestedKind, output: PathBuf) -> Result<()> {
    let url = validation::parse_supported_url(&url)?;
    tokio::fs::create_dir_all(&output).await?;

    let engine = DownloadEngine::new();
    let cancel = CancellationToken::new();
    let request = DownloadRequest { url, chat_id: 0, kind };

    let outcome = engine.download(&request, &cancel).await?;
    log::info!("Downloaded \"{}\" in {} attempt(s)", outcome.title, outcome.attempts);

    let artifacts = [
        &outcome.artifacts.video,
        &outcome.artifacts.audio,
        &outcome.artifacts.gif,
        &outcome.artifacts.image,
    ];
    for path in artifacts.into_iter().flatten() {
        let name = path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("artifact without a file name"))?;
        let dest = output.join(name);
        tokio::fs::copy(path, &dest).await?;
        println!("{}", dest.display());
    }

    outcome.workspace.release();
    Ok(())
}
