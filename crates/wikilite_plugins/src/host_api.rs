//! Native functions injected into every sandbox.
//!
//! Storage is only reachable through a [`PluginScope`], which is created by the
//! sandbox initializer for one plugin and captured by that plugin's `Host`
//! table. Nothing a script can call takes a namespace argument.

use crate::sanitizer::Sanitizer;
use mlua::{Function, Lua, LuaSerdeExt, Table, Value, Variadic};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};
use wikilite_storage::PluginStore;

/// Label used for log lines from shared support libraries
const SHARED_LABEL: &str = "shared";

/// Storage handle bound to exactly one plugin's namespace.
///
/// Failures are logged and reported to the script as `nil`, `false` or an
/// empty list so a storage hiccup never aborts plugin code.
#[derive(Clone)]
pub struct PluginScope {
    plugin_id: Arc<str>,
    store: Arc<dyn PluginStore>,
}

impl fmt::Debug for PluginScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginScope")
            .field("plugin_id", &self.plugin_id)
            .finish_non_exhaustive()
    }
}

impl PluginScope {
    pub(crate) fn new(plugin_id: &str, store: Arc<dyn PluginStore>) -> Self {
        Self {
            plugin_id: Arc::from(plugin_id),
            store,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.store.get(&self.plugin_id, key) {
            Ok(value) => value,
            Err(e) => {
                warn!(plugin = %self.plugin_id, "storage.get('{}') failed: {}", key, e);
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: &str) -> bool {
        match self.store.set(&self.plugin_id, key, value) {
            Ok(()) => true,
            Err(e) => {
                warn!(plugin = %self.plugin_id, "storage.set('{}') failed: {}", key, e);
                false
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        match self.store.delete(&self.plugin_id, key) {
            Ok(()) => true,
            Err(e) => {
                warn!(plugin = %self.plugin_id, "storage.delete('{}') failed: {}", key, e);
                false
            }
        }
    }

    pub fn list(&self, prefix: &str) -> Vec<String> {
        match self.store.list(&self.plugin_id, prefix) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(plugin = %self.plugin_id, "storage.list('{}') failed: {}", prefix, e);
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LogLevel {
    Info,
    Warn,
    Error,
}

fn emit(level: LogLevel, label: &str, message: &str) {
    match level {
        LogLevel::Info => info!(target: "plugin", plugin = %label, "[PLUGIN] {}", message),
        LogLevel::Warn => warn!(target: "plugin", plugin = %label, "[PLUGIN] {}", message),
        LogLevel::Error => error!(target: "plugin", plugin = %label, "[PLUGIN] {}", message),
    }
}

fn display_value(lua: &Lua, value: Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy().to_string(),
        table @ Value::Table(_) => match lua.from_value::<serde_json::Value>(table) {
            Ok(json) => json.to_string(),
            Err(_) => "table".to_string(),
        },
        other => other.type_name().to_string(),
    }
}

fn log_function(lua: &Lua, label: Arc<str>, level: LogLevel) -> mlua::Result<Function> {
    lua.create_function(move |lua, args: Variadic<Value>| {
        let message = args
            .into_iter()
            .map(|v| display_value(lua, v))
            .collect::<Vec<_>>()
            .join(" ");
        emit(level, &label, &message);
        Ok(())
    })
}

fn console_table(lua: &Lua, label: &Arc<str>) -> mlua::Result<Table> {
    let console = lua.create_table()?;
    console.set("log", log_function(lua, Arc::clone(label), LogLevel::Info)?)?;
    console.set("info", log_function(lua, Arc::clone(label), LogLevel::Info)?)?;
    console.set("warn", log_function(lua, Arc::clone(label), LogLevel::Warn)?)?;
    console.set("error", log_function(lua, Arc::clone(label), LogLevel::Error)?)?;
    Ok(console)
}

fn sanitize_function(lua: &Lua, sanitizer: &Arc<dyn Sanitizer>) -> mlua::Result<Function> {
    let sanitizer = Arc::clone(sanitizer);
    lua.create_function(move |_, html: String| Ok(sanitizer.sanitize(&html)))
}

/// Install logging into `target` (globals or a plugin environment) under `label`
fn install_logging(lua: &Lua, target: &Table, host: &Table, label: &Arc<str>) -> mlua::Result<()> {
    host.set("log", log_function(lua, Arc::clone(label), LogLevel::Info)?)?;
    target.set("print", log_function(lua, Arc::clone(label), LogLevel::Info)?)?;
    target.set("console", console_table(lua, label)?)?;
    Ok(())
}

fn json_table(lua: &Lua) -> mlua::Result<Table> {
    let json = lua.create_table()?;

    let encode = lua.create_function(|lua, value: Value| {
        let json: serde_json::Value = lua.from_value(value)?;
        serde_json::to_string(&json).map_err(mlua::Error::external)
    })?;
    json.set("encode", encode)?;

    let decode = lua.create_function(|lua, text: String| {
        let json: serde_json::Value =
            serde_json::from_str(&text).map_err(mlua::Error::external)?;
        lua.to_value(&json)
    })?;
    json.set("decode", decode)?;

    Ok(json)
}

/// Host functions visible in the shared global namespace, where support
/// libraries run. There is no storage here: storage needs a plugin scope.
pub(crate) fn install_shared(lua: &Lua, sanitizer: &Arc<dyn Sanitizer>) -> mlua::Result<()> {
    let globals = lua.globals();
    let label: Arc<str> = Arc::from(SHARED_LABEL);

    let host = lua.create_table()?;
    host.set("sanitize", sanitize_function(lua, sanitizer)?)?;
    install_logging(lua, &globals, &host, &label)?;
    globals.set("Host", host)?;
    globals.set("json", json_table(lua)?)?;

    Ok(())
}

/// Host functions for one plugin, written into that plugin's environment
pub(crate) fn install_scoped(
    lua: &Lua,
    env: &Table,
    scope: PluginScope,
    sanitizer: &Arc<dyn Sanitizer>,
) -> mlua::Result<()> {
    let label = Arc::clone(&scope.plugin_id);
    let storage = lua.create_table()?;

    let s = scope.clone();
    storage.set(
        "get",
        lua.create_function(move |_, key: String| Ok(s.get(&key)))?,
    )?;

    let s = scope.clone();
    storage.set(
        "set",
        lua.create_function(move |_, (key, value): (String, String)| Ok(s.set(&key, &value)))?,
    )?;

    let s = scope.clone();
    storage.set(
        "delete",
        lua.create_function(move |_, key: String| Ok(s.delete(&key)))?,
    )?;

    let s = scope;
    storage.set(
        "list",
        lua.create_function(move |_, prefix: Option<String>| {
            Ok(s.list(prefix.as_deref().unwrap_or("")))
        })?,
    )?;

    let host = lua.create_table()?;
    host.set("storage", storage)?;
    host.set("sanitize", sanitize_function(lua, sanitizer)?)?;
    install_logging(lua, env, &host, &label)?;
    env.set("Host", host)?;

    Ok(())
}
