//! `portico config`: print the effective configuration.

use crate::ui;
use anyhow::Context;
use portico_wire::{default_config_path, load_config};
use std::path::PathBuf;

pub fn cmd_config_show(config: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let path = config.unwrap_or_else(default_config_path);
    let loaded = load_config(Some(&path));

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&loaded).context("serializing config")?
        );
        return Ok(());
    }

    ui::section("Configuration");
    ui::kv("Path", &path.display().to_string());
    ui::blank();
    print!(
        "{}",
        toml::to_string_pretty(&loaded).context("serializing config")?
    );
    Ok(())
}
