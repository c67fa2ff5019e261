use crate::error::{PluginError, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Name of the editor type-definition file kept in the plugin directory
pub const TYPE_DEFINITIONS_FILE: &str = "types.d.lua";

const TYPE_DEFINITIONS: &str = include_str!("lua/types.d.lua");

/// A plugin script ready to be evaluated inside a sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDefinition {
    /// Unique id; also the storage namespace and log label
    pub id: String,
    /// Position in the render pipeline, ascending
    pub order: i64,
    pub source: String,
}

impl PluginDefinition {
    pub fn new(id: impl Into<String>, order: i64, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            order,
            source: source.into(),
        }
    }
}

/// Scan `dir` for `<order>-<id>.lua` scripts.
///
/// Files without a numeric order prefix are skipped. The result is sorted by
/// order, then id; when two files share an id the lower order wins.
pub fn load_from_directory<P: AsRef<Path>>(dir: P) -> Result<Vec<PluginDefinition>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Err(PluginError::LoadFailed(format!(
            "Plugin directory does not exist: {}",
            dir.display()
        )));
    }

    if !dir.is_dir() {
        return Err(PluginError::LoadFailed(format!(
            "Path is not a directory: {}",
            dir.display()
        )));
    }

    ensure_type_definitions(dir)?;

    let mut plugins = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("lua") {
            continue;
        }

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((order, id)) = parse_file_name(file_name) else {
            debug!("Skipping plugin file without order prefix: {}", path.display());
            continue;
        };

        let source = std::fs::read_to_string(&path).map_err(|e| {
            PluginError::LoadFailed(format!("Failed to read plugin {}: {}", path.display(), e))
        })?;

        plugins.push(PluginDefinition::new(id, order, source));
    }

    let plugins = pipeline_order(plugins);
    info!("Loaded {} plugins from {}", plugins.len(), dir.display());

    Ok(plugins)
}

/// Sort by ascending order, then id, and keep only the first plugin for each
/// id. Later duplicates are dropped with a warning.
pub fn pipeline_order(mut plugins: Vec<PluginDefinition>) -> Vec<PluginDefinition> {
    plugins.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));

    let mut seen = HashSet::new();
    plugins.retain(|p| {
        let first = seen.insert(p.id.clone());
        if !first {
            warn!("Duplicate plugin id '{}' (order {}) ignored", p.id, p.order);
        }
        first
    });
    plugins
}

/// Split `10-word-count.lua` into `(10, "word-count")`
fn parse_file_name(file_name: &str) -> Option<(i64, String)> {
    let stem = file_name.strip_suffix(".lua")?;
    let (order, id) = stem.split_once('-')?;
    let order = order.parse::<i64>().ok()?;
    if id.is_empty() {
        return None;
    }
    Some((order, id.to_string()))
}

/// Write the Host API type definitions into `dir` unless already present
pub fn ensure_type_definitions<P: AsRef<Path>>(dir: P) -> Result<()> {
    let path = dir.as_ref().join(TYPE_DEFINITIONS_FILE);
    if path.exists() {
        return Ok(());
    }

    std::fs::write(&path, TYPE_DEFINITIONS).map_err(|e| {
        PluginError::LoadFailed(format!("Failed to write {}: {}", path.display(), e))
    })?;
    debug!("Wrote plugin type definitions to {}", path.display());
    Ok(())
}
