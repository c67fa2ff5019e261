use crate::error::{PluginError, Result};
use crate::host_api::{self, PluginScope};
use crate::job::{ACTION_HOOK, PluginFault, RENDER_HOOK};
use crate::registry::PluginDefinition;
use crate::sandbox::SandboxConfig;
use crate::sanitizer::Sanitizer;
use crate::support;
use indexmap::IndexMap;
use mlua::{Function, HookTriggers, Lua, LuaSerdeExt, Table, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::debug;
use wikilite_storage::PluginStore;

/// Response for an action aimed at a plugin without a matching `onAction`
pub(crate) const NOT_FOUND_RESPONSE: &str = r#"{"error":"Plugin or action not found"}"#;

/// Instructions between two limit checks
const HOOK_INTERVAL: u32 = 1000;

/// Everything a worker needs to build its own sandbox
pub(crate) struct SandboxBlueprint {
    pub plugins: Arc<[PluginDefinition]>,
    pub libraries: Arc<str>,
    pub store: Arc<dyn PluginStore>,
    pub sanitizer: Arc<dyn Sanitizer>,
    pub config: SandboxConfig,
}

/// The only functions read back out of a plugin's environment
struct PluginExports {
    on_article_render: Option<Function>,
    on_action: Option<Function>,
}

impl PluginExports {
    fn from_env(env: &Table) -> mlua::Result<Self> {
        let function = |name: &str| -> mlua::Result<Option<Function>> {
            match env.get::<Value>(name)? {
                Value::Function(f) => Ok(Some(f)),
                _ => Ok(None),
            }
        };
        Ok(Self {
            on_article_render: function(RENDER_HOOK)?,
            on_action: function(ACTION_HOOK)?,
        })
    }

    fn hook(&self, name: &str) -> Option<&Function> {
        match name {
            RENDER_HOOK => self.on_article_render.as_ref(),
            ACTION_HOOK => self.on_action.as_ref(),
            _ => None,
        }
    }
}

/// Result of running one hook across the ordered plugin list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    pub content: String,
    pub faults: Vec<PluginFault>,
}

/// One Lua interpreter holding every plugin, each in its own environment.
///
/// Not shared between threads: a worker builds it, uses it and drops it.
pub struct Sandbox {
    lua: Lua,
    plugins: IndexMap<String, PluginExports>,
    config: SandboxConfig,
}

impl Sandbox {
    pub(crate) fn new(blueprint: &SandboxBlueprint) -> Result<Self> {
        let lua = Lua::new();
        let config = blueprint.config.clone();

        Self::apply_sandbox(&lua)?;
        lua.set_memory_limit(config.memory_limit)?;

        host_api::install_shared(&lua, &blueprint.sanitizer)?;
        support::install_wiki_helpers(&lua)?;
        guarded(&lua, &config, || {
            support::load_libraries(&lua, &blueprint.libraries)
        })
        .map_err(|e| PluginError::LoadFailed(format!("Support libraries error: {}", e)))?;

        let mut plugins = IndexMap::with_capacity(blueprint.plugins.len());
        for plugin in blueprint.plugins.iter() {
            let env = isolated_environment(&lua)?;
            host_api::install_scoped(
                &lua,
                &env,
                PluginScope::new(&plugin.id, Arc::clone(&blueprint.store)),
                &blueprint.sanitizer,
            )?;

            guarded(&lua, &config, || {
                lua.load(plugin.source.as_str())
                    .set_name(format!("plugin:{}", plugin.id))
                    .set_environment(env.clone())
                    .exec()
            })
            .map_err(|e| PluginError::LoadFailed(format!("Plugin {} error: {}", plugin.id, e)))?;

            plugins.insert(plugin.id.clone(), PluginExports::from_env(&env)?);
            debug!("Evaluated plugin {} (order {})", plugin.id, plugin.order);
        }

        Ok(Self {
            lua,
            plugins,
            config,
        })
    }

    /// Apply sandboxing by removing dangerous Lua standard libraries
    fn apply_sandbox(lua: &Lua) -> Result<()> {
        let globals = lua.globals();

        for module in &[
            "os", "io", "debug", "package", "dofile", "loadfile", "require",
            "load", "loadstring", "collectgarbage", "rawget", "rawset",
            "rawequal", "rawlen", "getmetatable", "setmetatable",
        ] {
            globals.set(*module, Value::Nil)?;
        }

        Ok(())
    }

    /// Run `hook` on every plugin in order, feeding each string result to the next.
    ///
    /// A failing plugin is recorded as a fault and skipped; the content it
    /// received passes on unchanged.
    pub fn run_pipeline(
        &self,
        hook: &str,
        input: &str,
        context_json: Option<&str>,
    ) -> Result<PipelineRun> {
        let ctx = self.context_value(context_json)?;
        let mut current = input.to_string();
        let mut faults = Vec::new();

        for (id, exports) in &self.plugins {
            let Some(func) = exports.hook(hook) else {
                continue;
            };

            let outcome = guarded(&self.lua, &self.config, || {
                func.call::<Value>((current.as_str(), ctx.clone()))
            })
            .and_then(|value| self.as_content(value));

            match outcome {
                Ok(Some(next)) => current = next,
                Ok(None) => {}
                Err(e) => {
                    let error = fault_message(&e);
                    debug!("Plugin '{}' failed in {}: {}", id, hook, error);
                    faults.push(PluginFault {
                        plugin_id: id.clone(),
                        hook: hook.to_string(),
                        error,
                    });
                }
            }
        }

        Ok(PipelineRun {
            content: current,
            faults,
        })
    }

    /// Call one plugin's `onAction` and return its result encoded as JSON
    pub fn run_action(
        &self,
        plugin_id: &str,
        action: &str,
        payload_json: &str,
        context_json: Option<&str>,
    ) -> Result<String> {
        let Some(on_action) = self
            .plugins
            .get(plugin_id)
            .and_then(|exports| exports.on_action.as_ref())
        else {
            return Ok(NOT_FOUND_RESPONSE.to_string());
        };

        let ctx = self.context_value(context_json)?;
        let payload = serde_json::from_str::<serde_json::Value>(payload_json)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
        let payload = self.lua.to_value(&payload)?;

        let value = guarded(&self.lua, &self.config, || {
            on_action.call::<Value>((action, payload, ctx))
        })
        .map_err(|e| PluginError::ExecutionFailed(format!("{}: {}", plugin_id, fault_message(&e))))?;

        let json: serde_json::Value = self
            .lua
            .from_value(value)
            .map_err(|e| PluginError::MalformedResponse(format!("{}: {}", plugin_id, e)))?;
        Ok(serde_json::to_string(&json)?)
    }

    fn context_value(&self, context_json: Option<&str>) -> Result<Value> {
        match context_json {
            Some(json) => {
                let json: serde_json::Value = serde_json::from_str(json)?;
                Ok(self.lua.to_value(&json)?)
            }
            None => Ok(Value::Nil),
        }
    }

    /// Only a string return replaces the running content
    fn as_content(&self, value: Value) -> mlua::Result<Option<String>> {
        match value {
            Value::String(_) => self.lua.unpack::<String>(value).map(Some),
            _ => Ok(None),
        }
    }
}

/// A fresh environment seeded from the (already sandboxed) globals.
///
/// Plugin top-level declarations land here, never in the shared globals.
/// Library tables such as `string` or `util` are copied one level deep so a
/// plugin replacing one of their functions only affects itself.
fn isolated_environment(lua: &Lua) -> mlua::Result<Table> {
    let globals = lua.globals();
    let env = lua.create_table()?;
    for pair in globals.pairs::<Value, Value>() {
        let (key, value) = pair?;
        let value = match value {
            Value::Table(table) if table != globals => Value::Table(shallow_copy(lua, &table)?),
            other => other,
        };
        env.raw_set(key, value)?;
    }
    env.raw_set("_G", env.clone())?;
    Ok(env)
}

fn shallow_copy(lua: &Lua, table: &Table) -> mlua::Result<Table> {
    let copy = lua.create_table()?;
    for pair in table.pairs::<Value, Value>() {
        let (key, value) = pair?;
        copy.raw_set(key, value)?;
    }
    Ok(copy)
}

/// Run `f` with the per-call instruction and wall-clock budget installed
fn guarded<T>(
    lua: &Lua,
    config: &SandboxConfig,
    f: impl FnOnce() -> mlua::Result<T>,
) -> mlua::Result<T> {
    let timeout = config.timeout();
    let deadline = Instant::now() + timeout;
    let limit = config.instruction_limit;
    let counter = AtomicU64::new(0);

    lua.set_hook(
        HookTriggers {
            every_nth_instruction: Some(HOOK_INTERVAL),
            ..Default::default()
        },
        move |_lua, _debug| {
            if Instant::now() >= deadline {
                return Err(mlua::Error::RuntimeError(format!(
                    "Execution timed out after {:?}",
                    timeout
                )));
            }

            if let Some(limit) = limit {
                let count = counter.fetch_add(u64::from(HOOK_INTERVAL), Ordering::Relaxed);
                if count > limit {
                    return Err(mlua::Error::RuntimeError(
                        "Instruction limit exceeded".to_string(),
                    ));
                }
            }
            Ok(mlua::VmState::Continue)
        },
    );

    let result = f();

    lua.remove_hook();

    result
}

/// First line of a Lua error, without the stack traceback
fn fault_message(error: &mlua::Error) -> String {
    let message = error.to_string();
    message
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or(message.as_str())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitizer::UgcSanitizer;
    use wikilite_storage::MemoryStore;

    fn blueprint(plugins: Vec<PluginDefinition>, config: SandboxConfig) -> SandboxBlueprint {
        SandboxBlueprint {
            plugins: plugins.into(),
            libraries: Arc::from(support::PRELUDE),
            store: Arc::new(MemoryStore::new()),
            sanitizer: Arc::new(UgcSanitizer),
            config,
        }
    }

    fn sandbox(plugins: Vec<PluginDefinition>) -> Sandbox {
        Sandbox::new(&blueprint(plugins, SandboxConfig::default())).unwrap()
    }

    #[test]
    fn test_pipeline_runs_in_order() {
        let sandbox = sandbox(vec![
            PluginDefinition::new("b", 2, r#"function onArticleRender(c) return c .. "-B" end"#),
            PluginDefinition::new("a", 10, r#"function onArticleRender(c) return c .. "-A" end"#),
        ]);

        let run = sandbox.run_pipeline(RENDER_HOOK, "X", None).unwrap();
        assert_eq!(run.content, "X-B-A");
        assert!(run.faults.is_empty());
    }

    #[test]
    fn test_pipeline_isolates_faults() {
        let sandbox = sandbox(vec![
            PluginDefinition::new("first", 1, r#"function onArticleRender(c) return c .. " one" end"#),
            PluginDefinition::new("broken", 2, r#"function onArticleRender(c) error("boom") end"#),
            PluginDefinition::new("last", 3, r#"function onArticleRender(c) return c .. " three" end"#),
        ]);

        let run = sandbox.run_pipeline(RENDER_HOOK, "zero", None).unwrap();
        assert_eq!(run.content, "zero one three");
        assert_eq!(run.faults.len(), 1);
        assert_eq!(run.faults[0].plugin_id, "broken");
        assert_eq!(run.faults[0].hook, RENDER_HOOK);
        assert!(run.faults[0].error.contains("boom"));
    }

    #[test]
    fn test_non_string_return_keeps_content() {
        let sandbox = sandbox(vec![
            PluginDefinition::new("nil", 1, "function onArticleRender(c) end"),
            PluginDefinition::new("num", 2, "function onArticleRender(c) return 42 end"),
        ]);

        let run = sandbox.run_pipeline(RENDER_HOOK, "same", None).unwrap();
        assert_eq!(run.content, "same");
        assert!(run.faults.is_empty());
    }

    #[test]
    fn test_plugin_globals_are_isolated() {
        let sandbox = sandbox(vec![
            PluginDefinition::new(
                "writer",
                1,
                r#"
                secret = "mine"
                util.trim = function() return "patched" end
                function onArticleRender(c) return c end
                "#,
            ),
            PluginDefinition::new(
                "reader",
                2,
                r#"function onArticleRender(c) return tostring(secret) .. util.trim("  ok ") end"#,
            ),
        ]);

        let run = sandbox.run_pipeline(RENDER_HOOK, "x", None).unwrap();
        assert_eq!(run.content, "nilok");

        let leaked: Value = sandbox.lua.globals().get("secret").unwrap();
        assert!(leaked.is_nil());
    }

    #[test]
    fn test_context_is_passed_as_table() {
        let sandbox = sandbox(vec![PluginDefinition::new(
            "ctx",
            1,
            r#"function onArticleRender(c, ctx) return c .. ":" .. ctx.slug .. ":" .. ctx.caller.role end"#,
        )]);

        let run = sandbox
            .run_pipeline(
                RENDER_HOOK,
                "page",
                Some(r#"{"slug":"home","caller":{"name":"ada","role":"admin"}}"#),
            )
            .unwrap();
        assert_eq!(run.content, "page:home:admin");
    }

    #[test]
    fn test_action_round_trip() {
        let sandbox = sandbox(vec![PluginDefinition::new(
            "counter",
            1,
            r#"
            function onAction(action, payload, ctx)
                if action == "add" then
                    return { total = payload.a + payload.b }
                end
                return { error = "unknown action " .. action }
            end
            "#,
        )]);

        let result = sandbox
            .run_action("counter", "add", r#"{"a": 2, "b": 3}"#, None)
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(json["total"], 5);

        let result = sandbox.run_action("counter", "nope", "{}", None).unwrap();
        assert!(result.contains("unknown action nope"));
    }

    #[test]
    fn test_action_not_found() {
        let sandbox = sandbox(vec![PluginDefinition::new(
            "render-only",
            1,
            "function onArticleRender(c) return c end",
        )]);

        assert_eq!(
            sandbox.run_action("render-only", "x", "{}", None).unwrap(),
            NOT_FOUND_RESPONSE
        );
        assert_eq!(
            sandbox.run_action("missing", "x", "{}", None).unwrap(),
            NOT_FOUND_RESPONSE
        );
    }

    #[test]
    fn test_action_fault_is_error() {
        let sandbox = sandbox(vec![PluginDefinition::new(
            "thrower",
            1,
            r#"function onAction() error("nope") end"#,
        )]);

        let result = sandbox.run_action("thrower", "x", "{}", None);
        assert!(matches!(result, Err(PluginError::ExecutionFailed(_))));
    }

    #[test]
    fn test_action_unencodable_result_is_malformed() {
        let sandbox = sandbox(vec![PluginDefinition::new(
            "fn",
            1,
            r#"function onAction() return function() end end"#,
        )]);

        let result = sandbox.run_action("fn", "x", "{}", None);
        assert!(matches!(result, Err(PluginError::MalformedResponse(_))));
    }

    #[test]
    fn test_invalid_payload_becomes_empty_table() {
        let sandbox = sandbox(vec![PluginDefinition::new(
            "echo",
            1,
            r#"function onAction(a, payload) return { kind = type(payload), n = #payload } end"#,
        )]);

        let result = sandbox.run_action("echo", "x", "not json", None).unwrap();
        let json: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(json["kind"], "table");
        assert_eq!(json["n"], 0);
    }

    #[test]
    fn test_sandboxing_blocks_os() {
        let sandbox = sandbox(vec![PluginDefinition::new(
            "malicious",
            1,
            r#"function onArticleRender(c) os.execute("echo hacked") return c end"#,
        )]);

        let run = sandbox.run_pipeline(RENDER_HOOK, "test", None).unwrap();
        assert_eq!(run.content, "test");
        assert_eq!(run.faults.len(), 1);
    }

    #[test]
    fn test_instruction_limit() {
        let config = SandboxConfig {
            instruction_limit: Some(100_000),
            ..Default::default()
        };
        let sandbox = Sandbox::new(&blueprint(
            vec![PluginDefinition::new(
                "infinite",
                1,
                "function onArticleRender(c) while true do end end",
            )],
            config,
        ))
        .unwrap();

        let run = sandbox.run_pipeline(RENDER_HOOK, "test", None).unwrap();
        assert_eq!(run.faults.len(), 1);
        assert!(run.faults[0].error.contains("Instruction limit exceeded"));

        // the interpreter stays usable after an aborted call
        let run = sandbox.run_pipeline(RENDER_HOOK, "again", None).unwrap();
        assert_eq!(run.faults.len(), 1);
    }

    #[test]
    fn test_timeout_without_instruction_limit() {
        let config = SandboxConfig {
            timeout_ms: 50,
            ..SandboxConfig::unlimited()
        };
        let sandbox = Sandbox::new(&blueprint(
            vec![PluginDefinition::new(
                "spin",
                1,
                "function onArticleRender(c) while true do end end",
            )],
            config,
        ))
        .unwrap();

        let run = sandbox.run_pipeline(RENDER_HOOK, "test", None).unwrap();
        assert_eq!(run.faults.len(), 1);
        assert!(run.faults[0].error.contains("timed out"));
    }

    #[test]
    fn test_bad_plugin_source_fails_initialization() {
        let result = Sandbox::new(&blueprint(
            vec![PluginDefinition::new("syntax", 1, "function (")],
            SandboxConfig::default(),
        ));
        assert!(matches!(result, Err(PluginError::LoadFailed(msg)) if msg.contains("syntax")));
    }

    #[test]
    fn test_looping_top_level_fails_initialization() {
        let config = SandboxConfig {
            timeout_ms: 50,
            ..Default::default()
        };
        let result = Sandbox::new(&blueprint(
            vec![PluginDefinition::new("hang", 1, "while true do end")],
            config,
        ));
        assert!(result.is_err());
    }

    #[test]
    fn test_support_helpers_visible_to_plugins() {
        let sandbox = sandbox(vec![PluginDefinition::new(
            "helpers",
            1,
            r#"
            function onArticleRender(c)
                local links = wiki.links(c)
                return util.trim(c) .. "|" .. table.concat(links, ",")
            end
            "#,
        )]);

        let run = sandbox
            .run_pipeline(RENDER_HOOK, "  see [a](/wiki/rust)  ", None)
            .unwrap();
        assert_eq!(run.content, "see [a](/wiki/rust)|rust");
    }
}
