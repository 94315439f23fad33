//! Clap CLI definitions for Portico.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  portico demo                          Connect a host and an embedded context in memory
  portico demo --debug                  Same, with protocol diagnostics (RUST_LOG=debug)
  portico origin https://a.example:443  Print the origin a locator resolves to
  portico origin //cdn.example/app --location http://host.example
  portico config                        Show the effective configuration";

/// Portico: RPC between a host and the contexts it embeds.
#[derive(Parser)]
#[command(
    name = "portico",
    version,
    about = "Portico: RPC between a host and the contexts it embeds",
    after_help = AFTER_HELP,
)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect a host and an embedded context over the in-memory bus and
    /// exercise calls in both directions.
    Demo {
        /// Handshake deadline in milliseconds (overrides the config file).
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Emit protocol diagnostics.
        #[arg(long)]
        debug: bool,
        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the origin a resource locator resolves to.
    Origin {
        /// Resource locator, as it would appear on the embedding element.
        src: Option<String>,
        /// Location of the embedding document.
        #[arg(long, default_value = "http://localhost")]
        location: String,
    },
    /// Show the effective configuration.
    Config {
        /// Print as JSON instead of TOML.
        #[arg(long)]
        json: bool,
    },
}
