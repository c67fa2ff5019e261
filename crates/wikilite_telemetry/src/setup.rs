use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to initialize telemetry: {0}")]
    Init(String),
    #[error("Invalid log level: {0}")]
    Level(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Default filter when `RUST_LOG` is unset, e.g. `info` or `wikilite_plugins=debug`.
    pub level: String,
    /// Emit one JSON object per event instead of human-readable lines.
    pub json_output: bool,
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_output: false,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    fn filter(&self) -> Result<tracing_subscriber::EnvFilter, TelemetryError> {
        use tracing_subscriber::EnvFilter;

        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level)
                .map_err(|e| TelemetryError::Level(format!("{}: {}", self.level, e))),
        }
    }
}

/// Install the global subscriber. Events go to stderr so stdout stays free
/// for command output.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    use tracing_subscriber::{fmt, prelude::*};

    let filter = config.filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_output {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(config.with_target)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(config.with_target)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    result.map_err(|e| TelemetryError::Init(e.to_string()))
}
