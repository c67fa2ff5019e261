use anyhow::{Context, Result};
use console::style;

use crate::config::CliConfig;

pub fn run(config: &CliConfig, workers: bool) -> Result<()> {
    let plugins = wikilite_plugins::load_from_directory(&config.plugin_dir).with_context(|| {
        format!("Failed to load plugins from {}", config.plugin_dir.display())
    })?;

    println!(
        "{} {} plugins in {}",
        style("✓").green().bold(),
        style(plugins.len()).yellow().bold(),
        config.plugin_dir.display()
    );
    for plugin in &plugins {
        println!("  {:>5}  {}", style(plugin.order).dim(), plugin.id);
    }

    if workers {
        let manager = super::open_manager(config)?;
        println!();
        println!("{}", style("Workers").bold().cyan());
        for (id, state) in manager.worker_states().iter().enumerate() {
            println!("  #{:<3} {}", id, state);
        }
        println!(
            "  {} of {} ready",
            manager.ready_workers(),
            manager.worker_states().len()
        );
        manager.close()?;
    }

    Ok(())
}
