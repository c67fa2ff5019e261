use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource limits applied to every sandbox and to each plugin call inside it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Maximum wall-clock time for a single plugin call, in milliseconds
    pub timeout_ms: u64,

    /// Maximum memory usage of the whole interpreter in bytes
    pub memory_limit: usize,

    /// Maximum number of VM instructions per plugin call
    pub instruction_limit: Option<u64>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            memory_limit: 32 * 1024 * 1024, // 32MB
            instruction_limit: Some(100_000_000),
        }
    }
}

impl SandboxConfig {
    /// Create a new sandbox configuration with custom per-call timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Create a configuration with no instruction limit; the timeout still applies.
    #[cfg(test)]
    pub fn unlimited() -> Self {
        Self {
            instruction_limit: None,
            ..Default::default()
        }
    }
}
