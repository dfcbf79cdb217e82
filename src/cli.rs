use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::download::RequestedKind;

#[derive(Parser)]
#[command(name = "klipchi")]
#[command(author, version, about = "Telegram bot for downloading social media videos", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bot (default when no command is given)
    Run,

    /// One-shot headless download without the bot
    Download {
        /// Link to download
        url: String,

        /// What to produce: video, audio, gif, image or combined
        #[arg(short, long, default_value = "combined")]
        kind: RequestedKind,

        /// Directory to place the artifacts in
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
