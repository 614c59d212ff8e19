use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "bridge-relay", about = "Cross-chain bridge relay pipeline")]
pub struct Cli {
    /// Path to the relay's configuration file (JSON or TOML).
    #[arg(long)]
    pub config: PathBuf,

    /// Overrides the environment-driven log format selection.
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}
