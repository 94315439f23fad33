//! Portico CLI: runs the in-memory host/embedded demo and inspects origins.

mod cli;
mod cmd;
mod ui;

use crate::cli::*;
use clap::Parser;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn init_tracing_json() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    if cli.log_json {
        init_tracing_json();
    } else {
        init_tracing_stderr();
    }

    let result = match cli.command {
        Commands::Demo {
            timeout_ms,
            debug,
            json,
        } => cmd::demo::cmd_demo(cli.config, timeout_ms, debug, json),
        Commands::Origin { src, location } => cmd::origin::cmd_origin(src.as_deref(), &location),
        Commands::Config { json } => cmd::config::cmd_config_show(cli.config, json),
    };

    if let Err(e) = result {
        ui::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
