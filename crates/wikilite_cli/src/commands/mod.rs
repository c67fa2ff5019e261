pub mod action;
pub mod init_types;
pub mod list;
pub mod render;

use crate::config::CliConfig;
use anyhow::{Context, Result};
use wikilite_plugins::{PluginManager, RenderContext, Role};

/// Requesting user; only present when a name was given
pub struct CallerArg {
    pub name: String,
    pub role: Role,
}

pub fn caller(user: Option<String>, role: Role) -> Option<CallerArg> {
    user.map(|name| CallerArg { name, role })
}

pub fn context(slug: Option<String>, caller: Option<CallerArg>) -> Option<RenderContext> {
    if slug.is_none() && caller.is_none() {
        return None;
    }
    let mut ctx = RenderContext::new();
    if let Some(slug) = slug {
        ctx = ctx.with_slug(slug);
    }
    if let Some(caller) = caller {
        ctx = ctx.with_caller(caller.name, caller.role);
    }
    Some(ctx)
}

pub fn open_manager(config: &CliConfig) -> Result<PluginManager> {
    PluginManager::open(
        &config.plugin_dir,
        &config.storage_path,
        config.engine.clone(),
    )
    .with_context(|| {
        format!(
            "Failed to start plugin engine (plugins: {}, storage: {})",
            config.plugin_dir.display(),
            config.storage_path.display()
        )
    })
}
