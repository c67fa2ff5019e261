//! Shared fixtures for the workspace end-to-end tests and benchmarks.

use std::path::Path;
use wikilite_plugins::PluginDefinition;

/// Adds a table of contents built from the article's headings
pub const TOC_PLUGIN: &str = r#"
function onArticleRender(content, ctx)
    local headings = wiki.headings(content)
    if #headings < 2 then
        return content
    end
    local lines = { "Contents:" }
    for i, heading in ipairs(headings) do
        lines[#lines + 1] = i .. ". " .. heading
    end
    return table.concat(lines, "\n") .. "\n\n" .. content
end
"#;

/// Turns `[[Page Name]]` into markdown links to `/wiki/page-name`
pub const WIKILINK_PLUGIN: &str = r#"
function onArticleRender(content, ctx)
    return (content:gsub("%[%[(.-)%]%]", function(title)
        return "[" .. title .. "](/wiki/" .. util.slugify(title) .. ")"
    end))
end
"#;

/// Strips unsafe HTML through the host sanitizer
pub const SANITIZE_PLUGIN: &str = r#"
function onArticleRender(content, ctx)
    return Host.sanitize(content)
end
"#;

/// Counts page views per slug in plugin storage
pub const VIEWS_PLUGIN: &str = r#"
local function key(slug)
    return "views:" .. slug
end

function onAction(action, payload, ctx)
    local slug = (ctx and ctx.slug) or payload.slug
    if not slug then
        return { error = "slug required" }
    end
    if action == "view" then
        local n = tonumber(Host.storage.get(key(slug)) or "0") + 1
        Host.storage.set(key(slug), tostring(n))
        return { slug = slug, views = n }
    elseif action == "get" then
        return { slug = slug, views = tonumber(Host.storage.get(key(slug)) or "0") }
    elseif action == "reset" then
        Host.storage.delete(key(slug))
        return { slug = slug, views = 0 }
    end
    return { error = "unknown action " .. action }
end
"#;

pub const SAMPLE_ARTICLE: &str = "# Rust\n\nSee [[Memory Safety]] and [[Ownership]].\n\n## History\n\nStarted in 2006.<script>alert(1)</script>\n";

/// The sample plugins in pipeline order
pub fn sample_plugins() -> Vec<PluginDefinition> {
    vec![
        PluginDefinition::new("wikilinks", 10, WIKILINK_PLUGIN),
        PluginDefinition::new("toc", 20, TOC_PLUGIN),
        PluginDefinition::new("sanitize", 30, SANITIZE_PLUGIN),
        PluginDefinition::new("views", 40, VIEWS_PLUGIN),
    ]
}

/// Write the sample plugins into `dir` as `<order>-<id>.lua` files
pub fn write_sample_plugins(dir: &Path) -> std::io::Result<()> {
    for plugin in sample_plugins() {
        let file = dir.join(format!("{}-{}.lua", plugin.order, plugin.id));
        std::fs::write(file, plugin.source)?;
    }
    Ok(())
}
