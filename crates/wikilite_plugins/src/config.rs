use crate::sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Minimum pool size regardless of available parallelism.
pub const MIN_WORKERS: usize = 4;

/// Engine-wide settings for the worker pool, render cache and sandboxes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pool size; `None` means `max(available_parallelism, 4)`
    pub workers: Option<usize>,

    /// Job queue capacity as a multiple of the pool size
    pub queue_factor: usize,

    /// Lifetime of a cached render
    pub cache_ttl_secs: u64,

    /// Maximum number of cached renders
    pub cache_capacity: usize,

    /// Default deadline for `execute_*` calls
    pub call_timeout_secs: u64,

    /// Lua bundle replacing the built-in prelude
    pub library_path: Option<PathBuf>,

    pub sandbox: SandboxConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            queue_factor: 10,
            cache_ttl_secs: 30 * 60,
            cache_capacity: 1000,
            call_timeout_secs: 30,
            library_path: None,
            sandbox: SandboxConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fixed pool size
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    #[must_use]
    pub fn with_queue_factor(mut self, factor: usize) -> Self {
        self.queue_factor = factor;
        self
    }

    /// Set the cache TTL and capacity
    #[must_use]
    pub fn with_cache(mut self, ttl: Duration, capacity: usize) -> Self {
        self.cache_ttl_secs = ttl.as_secs();
        self.cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_secs = timeout.as_secs();
        self
    }

    #[must_use]
    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Effective pool size
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) => n.max(1),
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .max(MIN_WORKERS),
        }
    }

    /// Bounded job queue capacity
    pub fn queue_capacity(&self) -> usize {
        self.worker_count() * self.queue_factor.max(1)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}
