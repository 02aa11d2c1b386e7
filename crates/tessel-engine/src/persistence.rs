use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessel_events::ItemId;
use tracing::debug;

use crate::vm::Value;

/// One global variable in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedGlobal {
    pub name: String,
    pub value: Value,
}

/// Persisted runtime state of one script instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub item: ItemId,
    /// Hash of the module the globals belong to, as hex
    pub module_hash: String,
    pub state: String,
    pub min_event_delay_ms: u64,
    pub timer_interval_ms: Option<u64>,
    pub saved_at: DateTime<Utc>,
    pub globals: Vec<SavedGlobal>,
}

/// Stores snapshots outside the engine
pub trait StatePersistence: Send + Sync {
    fn save_state(&self, snapshot: &StateSnapshot) -> anyhow::Result<()>;
    fn delete_state(&self, item: ItemId) -> anyhow::Result<()>;
    fn load_state(&self, item: ItemId) -> anyhow::Result<Option<StateSnapshot>>;
}

/// Discards every snapshot
#[derive(Debug, Default)]
pub struct NoPersistence;

impl StatePersistence for NoPersistence {
    fn save_state(&self, _snapshot: &StateSnapshot) -> anyhow::Result<()> {
        Ok(())
    }

    fn delete_state(&self, _item: ItemId) -> anyhow::Result<()> {
        Ok(())
    }

    fn load_state(&self, _item: ItemId) -> anyhow::Result<Option<StateSnapshot>> {
        Ok(None)
    }
}

/// One `<item>.state.toml` file per script under a directory
#[derive(Debug, Clone)]
pub struct TomlStateStore {
    dir: PathBuf,
}

impl TomlStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, item: ItemId) -> PathBuf {
        self.dir.join(format!("{}.state.toml", item))
    }
}

impl StatePersistence for TomlStateStore {
    fn save_state(&self, snapshot: &StateSnapshot) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating state directory {}", self.dir.display()))?;
        let path = self.path_for(snapshot.item);
        let text = toml::to_string(snapshot).context("serializing state snapshot")?;
        std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
        debug!(target: "scripting", "Saved state of {} to {}", snapshot.item, path.display());
        Ok(())
    }

    fn delete_state(&self, item: ItemId) -> anyhow::Result<()> {
        let path = self.path_for(item);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }

    fn load_state(&self, item: ItemId) -> anyhow::Result<Option<StateSnapshot>> {
        let path = self.path_for(item);
        if !path.exists() {
            return Ok(None);
        }
        let text =
            std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let snapshot =
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vector3;

    fn snapshot() -> StateSnapshot {
        StateSnapshot {
            item: ItemId(42),
            module_hash: "00000000deadbeef".into(),
            state: "open".into(),
            min_event_delay_ms: 250,
            timer_interval_ms: Some(1000),
            saved_at: Utc::now(),
            globals: vec![
                SavedGlobal {
                    name: "count".into(),
                    value: Value::Integer(3),
                },
                SavedGlobal {
                    name: "home".into(),
                    value: Value::Vector(Vector3::new(1.0, 2.0, 3.0)),
                },
                SavedGlobal {
                    name: "names".into(),
                    value: Value::List(vec![Value::String("a".into()), Value::Float(0.5)]),
                },
            ],
        }
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlStateStore::new(dir.path());
        let saved = snapshot();
        store.save_state(&saved).unwrap();

        let loaded = store.load_state(ItemId(42)).unwrap().unwrap();
        assert_eq!(loaded.state, "open");
        assert_eq!(loaded.globals, saved.globals);
        assert_eq!(loaded.timer_interval_ms, Some(1000));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlStateStore::new(dir.path());
        store.save_state(&snapshot()).unwrap();
        store.delete_state(ItemId(42)).unwrap();
        store.delete_state(ItemId(42)).unwrap();
        assert!(store.load_state(ItemId(42)).unwrap().is_none());
    }
}
