//! # WikiLite Plugins
//!
//! Execution engine for third-party Lua plugins. Each plugin can transform
//! article content during rendering and answer targeted actions.
//!
//! ## Features
//!
//! - **Worker pool**: a fixed set of threads, each owning one Lua sandbox for its whole life
//! - **Render pipeline**: `onArticleRender` runs across all plugins in ascending order
//! - **Actions**: `onAction` runs on a single plugin and returns JSON
//! - **Render cache**: TTL and LRU bounded, invalidated per slug by successful actions
//! - **Host API**: scoped key/value storage, HTML sanitizing and logging
//!
//! ## Example: Rendering an article
//!
//! ```rust,no_run
//! use wikilite_plugins::{EngineConfig, PluginManager, RenderContext, Role, RENDER_HOOK};
//!
//! let manager = PluginManager::open("./plugins", "./data/plugins.db", EngineConfig::default())?;
//!
//! let ctx = RenderContext::new()
//!     .with_slug("main-page")
//!     .with_caller("ada", Role::Read);
//! let output = manager.execute_pipeline(RENDER_HOOK, "# Welcome", Some(&ctx))?;
//! for fault in &output.errors {
//!     eprintln!("{fault}");
//! }
//! println!("{}", output.content);
//! # Ok::<(), wikilite_plugins::PluginError>(())
//! ```
//!
//! ## Example: Writing a plugin
//!
//! ```lua
//! -- 10-word-count.lua
//! function onArticleRender(content, ctx)
//!     local words = #util.split(util.trim(content), " ")
//!     return content .. "\n\n_" .. words .. " words_"
//! end
//!
//! function onAction(action, payload, ctx)
//!     if action == "bump" then
//!         local n = tonumber(Host.storage.get("views") or "0") + 1
//!         Host.storage.set("views", tostring(n))
//!         return { views = n }
//!     end
//!     return { error = "unknown action" }
//! end
//! ```
//!
//! ## Sandboxing
//!
//! Every sandbox runs with:
//! - Memory limits (32MB default per interpreter)
//! - Per-call time limits (5s default) and instruction count limits
//! - No filesystem, process or module loading access
//! - A private global environment per plugin

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod host_api;
mod job;
mod lua_sandbox;
pub mod plugin_manager;
pub mod registry;
pub mod sandbox;
pub mod sanitizer;
pub mod support;
mod worker;

// Re-export main types
pub use cache::{CacheKey, RenderCache};
pub use config::EngineConfig;
pub use context::{Caller, RenderContext, Role};
pub use error::{PluginError, Result};
pub use job::{ACTION_HOOK, PluginFault, RENDER_HOOK};
pub use plugin_manager::{PipelineOutput, PluginManager};
pub use registry::{PluginDefinition, load_from_directory};
pub use sandbox::SandboxConfig;
pub use sanitizer::{Sanitizer, UgcSanitizer};
pub use worker::WorkerState;
