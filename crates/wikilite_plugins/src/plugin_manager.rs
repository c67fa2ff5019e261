use crate::cache::{CacheKey, RenderCache};
use crate::config::EngineConfig;
use crate::context::RenderContext;
use crate::error::{PluginError, Result};
use crate::job::{Job, JobKind, JobOutput, PluginFault, RENDER_HOOK};
use crate::lua_sandbox::SandboxBlueprint;
use crate::registry::{self, PluginDefinition};
use crate::sanitizer::{Sanitizer, UgcSanitizer};
use crate::support;
use crate::worker::{self, WorkerHandle, WorkerState};
use crossbeam_channel::{RecvTimeoutError, SendTimeoutError, Sender, bounded, unbounded};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wikilite_storage::{PluginStore, SqliteStore};

/// Result of a render pipeline call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutput {
    pub content: String,
    /// Plugins that failed during this run; empty for cached results
    pub errors: Vec<PluginFault>,
    /// True when served from the render cache without touching a worker
    pub cached: bool,
}

/// Owns the worker pool, the job queue and the render cache.
///
/// All methods take `&self`; the manager can be shared behind an `Arc` and
/// called from any number of threads.
pub struct PluginManager {
    plugins: Arc<[PluginDefinition]>,
    store: Arc<dyn PluginStore>,
    cache: RenderCache,
    jobs: Mutex<Option<Sender<Job>>>,
    stop: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<WorkerHandle>>,
    call_timeout: Duration,
    closed: AtomicBool,
}

impl PluginManager {
    /// Start a pool running `plugins` with the default HTML sanitizer
    pub fn new(
        plugins: Vec<PluginDefinition>,
        store: Arc<dyn PluginStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        Self::with_sanitizer(plugins, store, Arc::new(UgcSanitizer), config)
    }

    /// Load `<order>-<id>.lua` scripts from `plugin_dir` and keep plugin
    /// storage in an SQLite database at `storage_path`
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        plugin_dir: P,
        storage_path: Q,
        config: EngineConfig,
    ) -> Result<Self> {
        let plugins = registry::load_from_directory(plugin_dir)?;
        let store = SqliteStore::open(storage_path)?;
        Self::new(plugins, Arc::new(store), config)
    }

    /// Start a pool with a custom sanitizer behind `Host.sanitize`.
    ///
    /// Plugins run in ascending `order`, ties broken by id. A repeated id keeps
    /// only its lowest-order definition.
    ///
    /// Blocks until every worker has built its sandbox. Workers that fail are
    /// left stopped; if none succeed the first failure is returned.
    pub fn with_sanitizer(
        plugins: Vec<PluginDefinition>,
        store: Arc<dyn PluginStore>,
        sanitizer: Arc<dyn Sanitizer>,
        config: EngineConfig,
    ) -> Result<Self> {
        let libraries = support::resolve_libraries(config.library_path.as_deref())?;
        let plugins: Arc<[PluginDefinition]> = registry::pipeline_order(plugins).into();
        let blueprint = Arc::new(SandboxBlueprint {
            plugins: Arc::clone(&plugins),
            libraries,
            store: Arc::clone(&store),
            sanitizer,
            config: config.sandbox.clone(),
        });

        let worker_count = config.worker_count();
        let (job_tx, job_rx) = bounded(config.queue_capacity());
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (ready_tx, ready_rx) = unbounded();

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            workers.push(worker::spawn(
                id,
                Arc::clone(&blueprint),
                job_rx.clone(),
                stop_rx.clone(),
                ready_tx.clone(),
            )?);
        }
        drop((job_rx, stop_rx, ready_tx));

        let mut ready = 0;
        let mut first_error = None;
        for (id, outcome) in ready_rx.iter() {
            match outcome {
                Ok(()) => ready += 1,
                Err(e) => {
                    warn!("Plugin worker {} unavailable: {}", id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if ready == 0 {
            return Err(first_error.unwrap_or_else(|| {
                PluginError::LoadFailed("No plugin worker could be started".to_string())
            }));
        }
        if ready < worker_count {
            warn!(
                "Plugin pool running degraded: {}/{} workers ready",
                ready, worker_count
            );
        }

        info!(
            "Plugin pool started: {} workers, {} plugins, queue capacity {}",
            ready,
            plugins.len(),
            config.queue_capacity()
        );

        Ok(Self {
            plugins,
            store,
            cache: RenderCache::new(config.cache_ttl(), config.cache_capacity),
            jobs: Mutex::new(Some(job_tx)),
            stop: Mutex::new(Some(stop_tx)),
            workers: Mutex::new(workers),
            call_timeout: config.call_timeout(),
            closed: AtomicBool::new(false),
        })
    }

    /// Check if any plugins are loaded
    pub fn has_plugins(&self) -> bool {
        !self.plugins.is_empty()
    }

    /// Loaded plugins in pipeline order
    pub fn plugins(&self) -> &[PluginDefinition] {
        &self.plugins
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers.lock().iter().map(WorkerHandle::state).collect()
    }

    pub fn ready_workers(&self) -> usize {
        self.worker_states()
            .into_iter()
            .filter(|state| *state == WorkerState::Ready)
            .count()
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Run `hook` across all plugins using the configured call timeout
    pub fn execute_pipeline(
        &self,
        hook: &str,
        content: &str,
        context: Option<&RenderContext>,
    ) -> Result<PipelineOutput> {
        self.execute_pipeline_with_timeout(hook, content, context, self.call_timeout)
    }

    /// Run `hook` across all plugins in order.
    ///
    /// Render calls carrying a slug are served from the cache when possible
    /// and cached when every plugin succeeded, unless an action invalidated
    /// the slug while the render was running.
    pub fn execute_pipeline_with_timeout(
        &self,
        hook: &str,
        content: &str,
        context: Option<&RenderContext>,
        timeout: Duration,
    ) -> Result<PipelineOutput> {
        let cache_key = match context.and_then(RenderContext::slug) {
            Some(slug) if hook == RENDER_HOOK => Some(CacheKey::new(
                hook,
                slug,
                content,
                context.and_then(RenderContext::role),
            )),
            _ => None,
        };

        let generation = cache_key
            .as_ref()
            .map(|key| self.cache.generation(&key.slug));

        if let Some(key) = &cache_key {
            if let Some(content) = self.cache.get(key) {
                debug!("Render cache hit for '{}'", key.slug);
                return Ok(PipelineOutput {
                    content,
                    errors: Vec::new(),
                    cached: true,
                });
            }
        }

        let output = self.submit(
            JobKind::Pipeline {
                hook: hook.to_string(),
                input: content.to_string(),
            },
            context,
            timeout,
        )?;

        for fault in &output.faults {
            warn!("Plugin {} failed in {}: {}", fault.plugin_id, fault.hook, fault.error);
        }

        if let (Some(key), Some(generation)) = (cache_key, generation) {
            if output.faults.is_empty() {
                self.cache
                    .insert_if_current(key, generation, output.content.clone());
            }
        }

        Ok(PipelineOutput {
            content: output.content,
            errors: output.faults,
            cached: false,
        })
    }

    /// Run one plugin action using the configured call timeout
    pub fn execute_plugin_action(
        &self,
        plugin_id: &str,
        action: &str,
        payload_json: &str,
        context: Option<&RenderContext>,
    ) -> Result<String> {
        self.execute_plugin_action_with_timeout(
            plugin_id,
            action,
            payload_json,
            context,
            self.call_timeout,
        )
    }

    /// Run `action` on one plugin and return its JSON response.
    ///
    /// A response object with a non-empty `error` field is an error. On
    /// success every cached render of the context's slug is dropped.
    pub fn execute_plugin_action_with_timeout(
        &self,
        plugin_id: &str,
        action: &str,
        payload_json: &str,
        context: Option<&RenderContext>,
        timeout: Duration,
    ) -> Result<String> {
        let output = self.submit(
            JobKind::Action {
                plugin_id: plugin_id.to_string(),
                action: action.to_string(),
                payload: payload_json.to_string(),
            },
            context,
            timeout,
        )?;

        if let Some(message) = action_error(&output.content) {
            return Err(PluginError::ActionRejected(message));
        }

        if let Some(slug) = context.and_then(RenderContext::slug) {
            let removed = self.cache.invalidate_slug(slug);
            if removed > 0 {
                debug!(
                    "Action {}/{} invalidated {} renders of '{}'",
                    plugin_id, action, removed, slug
                );
            }
        }

        Ok(output.content)
    }

    fn submit(
        &self,
        kind: JobKind,
        context: Option<&RenderContext>,
        timeout: Duration,
    ) -> Result<JobOutput> {
        let context_json = context.map(serde_json::to_string).transpose()?;
        let sender = self.jobs.lock().clone().ok_or(PluginError::Closed)?;

        let deadline = Instant::now() + timeout;
        let (reply_tx, reply_rx) = bounded(1);
        let job = Job {
            kind,
            context_json,
            reply: reply_tx,
        };

        match sender.send_deadline(job, deadline) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(job)) => {
                warn!("No plugin worker free for {} within {:?}", job.label(), timeout);
                return Err(PluginError::PoolExhausted(timeout));
            }
            Err(SendTimeoutError::Disconnected(job)) => {
                warn!("No plugin worker left to run {}", job.label());
                return Err(PluginError::PoolExhausted(timeout));
            }
        }
        drop(sender);

        match reply_rx.recv_deadline(deadline) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(PluginError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(PluginError::WorkerLost),
        }
    }

    /// Stop all workers, clear the cache and close the store.
    ///
    /// Workers finish the job they are running; queued jobs are dropped and
    /// their callers receive [`PluginError::WorkerLost`]. Calling this again
    /// is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.jobs.lock().take();
        self.stop.lock().take();

        let mut workers = self.workers.lock();
        for handle in workers.iter_mut() {
            if let Some(thread) = handle.thread.take() {
                if thread.join().is_err() {
                    warn!("Plugin worker {} panicked", handle.id);
                }
            }
        }
        drop(workers);

        self.cache.clear();
        self.store.close()?;
        info!("Plugin pool closed");
        Ok(())
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error while closing plugin manager: {}", e);
        }
    }
}

/// Explicit `error` member of an action response, if any
fn action_error(response: &str) -> Option<String> {
    let response: serde_json::Value = serde_json::from_str(response).ok()?;
    match response.as_object()?.get("error")?.clone() {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Role;
    use wikilite_storage::MemoryStore;

    fn manager(plugins: Vec<PluginDefinition>) -> PluginManager {
        PluginManager::new(
            plugins,
            Arc::new(MemoryStore::new()),
            EngineConfig::new().with_workers(2),
        )
        .unwrap()
    }

    #[test]
    fn test_action_error_detection() {
        assert_eq!(action_error(r#"{"error":"nope"}"#).as_deref(), Some("nope"));
        assert_eq!(action_error(r#"{"error":""}"#), None);
        assert_eq!(action_error(r#"{"error":null,"ok":true}"#), None);
        assert_eq!(action_error(r#"{"error":{"code":1}}"#).as_deref(), Some(r#"{"code":1}"#));
        assert_eq!(action_error(r#"{"ok":true}"#), None);
        assert_eq!(action_error("null"), None);
        assert_eq!(action_error("[1,2]"), None);
    }

    #[test]
    fn test_empty_manager() {
        let manager = manager(Vec::new());
        assert!(!manager.has_plugins());
        assert_eq!(manager.ready_workers(), 2);

        let output = manager.execute_pipeline(RENDER_HOOK, "text", None).unwrap();
        assert_eq!(output.content, "text");
        assert!(!output.cached);
    }

    #[test]
    fn test_render_is_cached_per_slug() {
        let manager = manager(vec![PluginDefinition::new(
            "upper",
            1,
            "function onArticleRender(c) return string.upper(c) end",
        )]);
        let ctx = RenderContext::new()
            .with_slug("home")
            .with_caller("ada", Role::Read);

        let first = manager.execute_pipeline(RENDER_HOOK, "hello", Some(&ctx)).unwrap();
        assert_eq!(first.content, "HELLO");
        assert!(!first.cached);

        let second = manager.execute_pipeline(RENDER_HOOK, "hello", Some(&ctx)).unwrap();
        assert_eq!(second.content, "HELLO");
        assert!(second.cached);
        assert_eq!(manager.cached_entries(), 1);
    }

    #[test]
    fn test_uncacheable_calls() {
        let manager = manager(vec![PluginDefinition::new(
            "upper",
            1,
            r#"
            function onArticleRender(c) return string.upper(c) end
            function onPreview(c) return c end
            "#,
        )]);

        // no slug
        manager.execute_pipeline(RENDER_HOOK, "a", None).unwrap();
        manager
            .execute_pipeline(RENDER_HOOK, "a", Some(&RenderContext::new().with_slug("")))
            .unwrap();
        // not the render hook
        manager
            .execute_pipeline("onPreview", "a", Some(&RenderContext::new().with_slug("x")))
            .unwrap();

        assert_eq!(manager.cached_entries(), 0);
    }

    #[test]
    fn test_faulty_run_is_not_cached() {
        let manager = manager(vec![PluginDefinition::new(
            "flaky",
            1,
            r#"function onArticleRender(c) error("down") end"#,
        )]);
        let ctx = RenderContext::new().with_slug("home");

        let output = manager.execute_pipeline(RENDER_HOOK, "body", Some(&ctx)).unwrap();
        assert_eq!(output.content, "body");
        assert_eq!(output.errors.len(), 1);
        assert_eq!(manager.cached_entries(), 0);
    }

    #[test]
    fn test_action_rejection_keeps_cache() {
        let manager = manager(vec![PluginDefinition::new(
            "guard",
            1,
            r#"
            function onArticleRender(c) return c end
            function onAction(action) return { error = "denied: " .. action } end
            "#,
        )]);
        let ctx = RenderContext::new().with_slug("home");
        manager.execute_pipeline(RENDER_HOOK, "body", Some(&ctx)).unwrap();

        let result = manager.execute_plugin_action("guard", "wipe", "{}", Some(&ctx));
        assert!(matches!(result, Err(PluginError::ActionRejected(msg)) if msg == "denied: wipe"));
        assert_eq!(manager.cached_entries(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let manager = manager(Vec::new());
        manager.close().unwrap();
        manager.close().unwrap();

        assert!(manager
            .worker_states()
            .iter()
            .all(|state| *state == WorkerState::Stopped));
        assert!(matches!(
            manager.execute_pipeline(RENDER_HOOK, "x", None),
            Err(PluginError::Closed)
        ));
    }

    #[test]
    fn test_construction_fails_without_ready_workers() {
        let result = PluginManager::new(
            vec![PluginDefinition::new("bad", 1, "not valid lua at all")],
            Arc::new(MemoryStore::new()),
            EngineConfig::new().with_workers(2),
        );
        assert!(matches!(result, Err(PluginError::SandboxInit { .. })));
    }

    #[test]
    fn test_unreadable_library_override_fails() {
        let result = PluginManager::new(
            Vec::new(),
            Arc::new(MemoryStore::new()),
            EngineConfig::new()
                .with_workers(1)
                .with_library_path("/nonexistent/wikilite/libs.lua"),
        );
        assert!(matches!(result, Err(PluginError::LoadFailed(_))));
    }

    #[test]
    fn test_library_override_replaces_prelude() {
        let dir = tempfile::TempDir::new().unwrap();
        let libs = dir.path().join("libs.lua");
        std::fs::write(&libs, "shout = function(s) return s .. '!' end").unwrap();

        let manager = PluginManager::new(
            vec![PluginDefinition::new(
                "p",
                1,
                "function onArticleRender(c) return shout(c) .. tostring(util) end",
            )],
            Arc::new(MemoryStore::new()),
            EngineConfig::new().with_workers(1).with_library_path(&libs),
        )
        .unwrap();

        let output = manager.execute_pipeline(RENDER_HOOK, "hey", None).unwrap();
        assert_eq!(output.content, "hey!nil");
    }
}
