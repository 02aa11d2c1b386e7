use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::paths::ProjectPaths;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptingConfig {
    /// Directory scanned for scripts by `tessel run --watch`
    #[serde(default)]
    pub script_dir: Option<PathBuf>,

    /// Where script state snapshots are written
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Where generated modules are cached between runs; no disk cache when unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_hot_reload")]
    pub hot_reload: bool,

    #[serde(default = "default_hot_reload_interval")]
    pub hot_reload_interval_ms: u64,
}

fn default_hot_reload() -> bool {
    true
}

fn default_hot_reload_interval() -> u64 {
    1000
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            script_dir: None,
            state_dir: None,
            cache_dir: None,
            hot_reload: true,
            hot_reload_interval_ms: 1000,
        }
    }
}

impl ScriptingConfig {
    pub fn script_dir(&self) -> PathBuf {
        self.script_dir.clone().unwrap_or_else(|| {
            ProjectPaths::new("tessel")
                .map(|p| p.data_dir().join("scripts"))
                .unwrap_or_else(|| PathBuf::from(".scripts"))
        })
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            ProjectPaths::new("tessel")
                .map(|p| p.data_dir().join("state"))
                .unwrap_or_else(|| PathBuf::from(".state"))
        })
    }
}
