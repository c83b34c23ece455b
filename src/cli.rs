//! Command-line interface definition for Storyweave
//!
//! This module defines the CLI structure using clap's derive API.
//! Storyweave is a single long-running server, so there are no
//! subcommands, only startup overrides.

use clap::Parser;

/// Storyweave - interactive story server
///
/// Serve an interactive text-adventure over HTTP, proxying prompts to
/// a local Ollama server and persisting sessions in SQLite.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "storyweave")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Override the listen address from config (e.g. 0.0.0.0:8000)
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Override the Ollama model from config
    #[arg(short, long)]
    pub model: Option<String>,

    /// Override the session database path (also honored via STORYWEAVE_DB)
    #[arg(long, env = "STORYWEAVE_DB")]
    pub db_path: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
