use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::{EngineConfig, ProjectPaths, SandboxConfig, ScriptingConfig};

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Config file not found")]
    NotFound,
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("IO error reading config: {0}")]
    IoError(String),
    #[error("Failed to determine config directory")]
    NoConfigDir,
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TesselConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub scripting: ScriptingConfig,
}

impl TesselConfig {
    pub fn config_path() -> Result<PathBuf, ConfigLoadError> {
        let proj_paths = ProjectPaths::new("tessel").ok_or(ConfigLoadError::NoConfigDir)?;
        Ok(proj_paths.config_dir().join("config.toml"))
    }

    /// Load from the default location
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load_or_default() -> Result<Self, ConfigLoadError> {
        match Self::load() {
            Err(ConfigLoadError::NotFound) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound);
        }

        let content =
            fs::read_to_string(path).map_err(|e| ConfigLoadError::IoError(e.to_string()))?;
        let config =
            toml::from_str(&content).map_err(|e| ConfigLoadError::ParseError(e.to_string()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PermissionTier, SandboxMode};

    #[test]
    fn test_defaults() {
        let config = TesselConfig::default();
        assert_eq!(config.engine.max_threads, 100);
        assert_eq!(config.engine.idle_passes_before_exit, 20);
        assert_eq!(config.sandbox.scripts_per_domain, 1);
        assert_eq!(config.sandbox.max_domains, 10_000);
        assert_eq!(config.sandbox.fuel, 1_000_000);
        assert_eq!(config.sandbox.mode, SandboxMode::Isolated);
        assert_eq!(config.sandbox.tier, PermissionTier::Standard);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: TesselConfig = toml::from_str(
            r#"
            [engine]
            max_threads = 8

            [sandbox]
            tier = "none"
            mode = "trusted"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.max_threads, 8);
        assert_eq!(config.engine.min_threads, 2);
        assert_eq!(config.sandbox.tier, PermissionTier::None);
        assert_eq!(config.sandbox.mode, SandboxMode::Trusted);
        assert!(config.scripting.hot_reload);
    }

    #[test]
    fn test_bad_tier_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[sandbox]\ntier = \"root\"\n").unwrap();
        assert!(matches!(
            TesselConfig::load_from(&path),
            Err(ConfigLoadError::ParseError(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = TesselConfig::default();
        config.engine.performance_factor = 2.5;
        config.scripting.cache_dir = Some(dir.path().join("cache"));
        config.save_to(&path).unwrap();

        let loaded = TesselConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            TesselConfig::load_from(&dir.path().join("absent.toml")),
            Err(ConfigLoadError::NotFound)
        ));
    }
}
