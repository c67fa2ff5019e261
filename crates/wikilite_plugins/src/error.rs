use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Failed to load plugin: {0}")]
    LoadFailed(String),

    #[error("Worker {worker} failed to initialize sandbox: {reason}")]
    SandboxInit { worker: usize, reason: String },

    #[error("Plugin execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Plugin action error: {0}")]
    ActionRejected(String),

    #[error("Plugin returned invalid data: {0}")]
    MalformedResponse(String),

    #[error("No plugin worker available within {0:?}")]
    PoolExhausted(Duration),

    #[error("Plugin job timed out after {0:?}")]
    Timeout(Duration),

    #[error("Plugin worker dropped the job without replying")]
    WorkerLost,

    #[error("Plugin manager is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] wikilite_storage::StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PluginError>;
