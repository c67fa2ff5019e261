use anyhow::{Context, Result};
use console::style;
use std::io::Read;
use std::path::Path;

use super::CallerArg;
use crate::config::CliConfig;

pub fn run(
    config: &CliConfig,
    input: &Path,
    hook: &str,
    slug: Option<String>,
    caller: Option<CallerArg>,
    repeat: u32,
) -> Result<()> {
    let content = read_input(input)?;
    let manager = super::open_manager(config)?;
    let ctx = super::context(slug, caller);

    let mut last = None;
    for _ in 0..repeat.max(1) {
        let output = manager
            .execute_pipeline(hook, &content, ctx.as_ref())
            .with_context(|| format!("Failed to run {}", hook))?;

        for fault in &output.errors {
            eprintln!(
                "{} {} ({}): {}",
                style("✗").red().bold(),
                style(&fault.plugin_id).yellow(),
                fault.hook,
                fault.error
            );
        }
        if output.cached {
            eprintln!("{} served from render cache", style("✓").green().bold());
        }
        last = Some(output);
    }

    if let Some(output) = last {
        println!("{}", output.content);
    }

    manager.close()?;
    Ok(())
}

fn read_input(input: &Path) -> Result<String> {
    if input.as_os_str() == "-" {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("Failed to read stdin")?;
        return Ok(content);
    }
    std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))
}
