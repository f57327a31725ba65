//! Command-line definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Operator CLI for API key rotation and provider fallback
#[derive(Parser, Debug)]
#[command(name = "keyrot")]
#[command(about = "Inspect and exercise rotating API keys across LLM providers", long_about = None)]
#[command(version)]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(long, env = "CONFIG_PATH", default_value = "keyrot.toml")]
    pub config: PathBuf,

    /// Print Prometheus metrics after the command
    #[arg(long)]
    pub metrics: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print per-provider key health as JSON
    Status,

    /// Clear cooldowns (all providers when none are named)
    Clear {
        /// Providers to clear
        providers: Vec<String>,
    },

    /// Send one user message and print the reply
    Chat {
        /// Prompt words, joined with spaces
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },

    /// Embed each text and print the vectors as JSON
    Embed {
        /// Texts to embed
        #[arg(required = true, num_args = 1..)]
        texts: Vec<String>,
    },
}

impl Command {
    /// Label used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::Clear { .. } => "clear",
            Command::Chat { .. } => "chat",
            Command::Embed { .. } => "embed",
        }
    }
}
