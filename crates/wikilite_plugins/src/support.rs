use crate::error::{PluginError, Result};
use indexmap::IndexSet;
use mlua::Lua;
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Lua bundle loaded into every sandbox unless an override is configured
pub const PRELUDE: &str = include_str!("lua/prelude.lua");

static HEADING_REGEX: OnceLock<Regex> = OnceLock::new();
static LINK_REGEX: OnceLock<Regex> = OnceLock::new();
static NON_ALNUM_REGEX: OnceLock<Regex> = OnceLock::new();

/// Read the override bundle, or fall back to the built-in prelude
pub fn resolve_libraries(path: Option<&Path>) -> Result<Arc<str>> {
    match path {
        Some(path) => {
            let source = std::fs::read_to_string(path).map_err(|e| {
                PluginError::LoadFailed(format!(
                    "Failed to load support libraries {}: {}",
                    path.display(),
                    e
                ))
            })?;
            debug!("Using support libraries from {}", path.display());
            Ok(Arc::from(source))
        }
        None => Ok(Arc::from(PRELUDE)),
    }
}

/// Markdown ATX headings, in document order
pub fn extract_headings(text: &str) -> Vec<String> {
    let heading_regex = HEADING_REGEX
        .get_or_init(|| Regex::new(r"(?m)^#{1,6}[ \t]+(.+?)[ \t]*#*[ \t]*$").unwrap());
    heading_regex
        .captures_iter(text)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Internal link targets of markdown links, deduplicated in first-seen order.
///
/// External `http…` targets are skipped and a leading `/wiki/` is stripped.
pub fn extract_links(text: &str) -> Vec<String> {
    let link_regex = LINK_REGEX.get_or_init(|| Regex::new(r"\[.*?\]\((.*?)\)").unwrap());

    let mut slugs = IndexSet::new();
    for cap in link_regex.captures_iter(text) {
        let Some(target) = cap.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if target.starts_with("http") {
            continue;
        }
        let slug = target
            .strip_prefix("/wiki/")
            .unwrap_or(target)
            .trim_matches('/');
        if !slug.is_empty() {
            slugs.insert(slug.to_string());
        }
    }
    slugs.into_iter().collect()
}

/// Lower-case kebab form used for article slugs
pub fn slugify(text: &str) -> String {
    let non_alnum = NON_ALNUM_REGEX.get_or_init(|| Regex::new(r"[^a-z0-9]+").unwrap());
    let lowered = text.to_lowercase();
    non_alnum
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

/// Add the `wiki` helper table to the global namespace
pub(crate) fn install_wiki_helpers(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    let wiki = lua.create_table()?;

    wiki.set(
        "headings",
        lua.create_function(|_, text: String| Ok(extract_headings(&text)))?,
    )?;
    wiki.set(
        "links",
        lua.create_function(|_, text: String| Ok(extract_links(&text)))?,
    )?;
    wiki.set(
        "slugify",
        lua.create_function(|_, text: String| Ok(slugify(&text)))?,
    )?;

    globals.set("wiki", wiki)?;

    debug!("Added wiki helper functions to Lua environment");
    Ok(())
}

/// Evaluate a support bundle verbatim in the global namespace
pub(crate) fn load_libraries(lua: &Lua, source: &str) -> mlua::Result<()> {
    lua.load(source).set_name("support").exec()
}
