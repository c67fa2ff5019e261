use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;
use wikilite_plugins::registry::{TYPE_DEFINITIONS_FILE, ensure_type_definitions};

use crate::config::CliConfig;

pub fn run(config: &CliConfig, dir: Option<PathBuf>) -> Result<()> {
    let dir = dir.unwrap_or_else(|| config.plugin_dir.clone());
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    ensure_type_definitions(&dir)?;

    println!(
        "{} {}",
        style("✓").green().bold(),
        dir.join(TYPE_DEFINITIONS_FILE).display()
    );
    Ok(())
}
