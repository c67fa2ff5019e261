use anyhow::{Context, Result};

use super::CallerArg;
use crate::config::CliConfig;

pub fn run(
    config: &CliConfig,
    plugin: &str,
    action: &str,
    payload: &str,
    slug: Option<String>,
    caller: Option<CallerArg>,
) -> Result<()> {
    serde_json::from_str::<serde_json::Value>(payload).context("Payload is not valid JSON")?;

    let manager = super::open_manager(config)?;
    let ctx = super::context(slug, caller);

    let response = manager
        .execute_plugin_action(plugin, action, payload, ctx.as_ref())
        .with_context(|| format!("Action {}/{} failed", plugin, action))?;

    let pretty = serde_json::from_str::<serde_json::Value>(&response)
        .and_then(|value| serde_json::to_string_pretty(&value))
        .unwrap_or(response);
    println!("{}", pretty);

    manager.close()?;
    Ok(())
}
