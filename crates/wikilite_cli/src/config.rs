use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use wikilite_plugins::EngineConfig;
use wikilite_telemetry::TelemetryConfig;

/// Config file read when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "wikilite-plugins.toml";

pub const ENV_PLUGIN_PATH: &str = "PLUGIN_PATH";
pub const ENV_STORAGE_PATH: &str = "PLUGIN_STORAGE_PATH";
pub const ENV_LIBRARY_PATH: &str = "LUAPKGS_PATH";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Directory scanned for `<order>-<id>.lua` plugins
    pub plugin_dir: PathBuf,
    /// SQLite database holding plugin key/value storage
    pub storage_path: PathBuf,
    pub engine: EngineConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from("plugins"),
            storage_path: PathBuf::from("data/plugins.db"),
            engine: EngineConfig::default(),
            telemetry: TelemetryConfig {
                level: "warn".to_string(),
                ..Default::default()
            },
        }
    }
}

impl CliConfig {
    /// Read `path` (missing file means defaults) and apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(dir) = lookup(ENV_PLUGIN_PATH) {
            self.plugin_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup(ENV_STORAGE_PATH) {
            self.storage_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_LIBRARY_PATH) {
            self.engine.library_path = Some(PathBuf::from(path));
        }
    }
}
