//! Script files as engine sources
//!
//! Every script the CLI runs lives in one console object, so link messages
//! reach all of them. Item ids are handed out per path and stay stable for
//! the life of the process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use tessel_engine::{ScriptSource, SourceProvider};
use tessel_events::{AgentId, ItemId, ObjectId};
use tracing::warn;

use crate::scanner::scripts_in_dir;

pub const SCRIPT_EXTENSION: &str = "lsl";
pub const CONSOLE_OBJECT: ObjectId = ObjectId(1);
pub const CONSOLE_OWNER: AgentId = AgentId(1);

#[derive(Default)]
struct Ids {
    by_path: HashMap<PathBuf, ItemId>,
    next: u64,
}

pub struct DirectorySources {
    dir: Option<PathBuf>,
    files: Vec<PathBuf>,
    ids: Mutex<Ids>,
}

impl DirectorySources {
    pub fn new(dir: Option<PathBuf>, files: Vec<PathBuf>) -> Self {
        Self {
            dir,
            files,
            ids: Mutex::new(Ids::default()),
        }
    }

    fn ids(&self) -> MutexGuard<'_, Ids> {
        self.ids.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn item_for(&self, path: &Path) -> ItemId {
        let mut ids = self.ids();
        if let Some(item) = ids.by_path.get(path) {
            return *item;
        }
        ids.next += 1;
        let item = ItemId(ids.next);
        ids.by_path.insert(path.to_path_buf(), item);
        item
    }

    pub fn path_of(&self, item: ItemId) -> Option<PathBuf> {
        self.ids()
            .by_path
            .iter()
            .find(|(_, id)| **id == item)
            .map(|(path, _)| path.clone())
    }

    /// Item whose file stem is `name`, among paths seen so far
    pub fn find_by_name(&self, name: &str) -> Option<ItemId> {
        self.ids()
            .by_path
            .iter()
            .find(|(path, _)| script_name(path) == name)
            .map(|(_, item)| *item)
    }

    /// Explicit files first, then the directory's scripts in name order
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths = self.files.clone();
        if let Some(dir) = &self.dir {
            let mut found: Vec<PathBuf> = scripts_in_dir(dir).into_keys().collect();
            found.sort();
            paths.extend(found.into_iter().filter(|p| !self.files.contains(p)));
        }
        paths
    }

    pub fn load(&self, path: &Path) -> anyhow::Result<ScriptSource> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        Ok(ScriptSource {
            object: CONSOLE_OBJECT,
            item: self.item_for(path),
            name: script_name(path),
            owner: CONSOLE_OWNER,
            source,
        })
    }
}

pub fn script_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl SourceProvider for DirectorySources {
    fn source_for(&self, item: ItemId) -> Option<ScriptSource> {
        let path = self.path_of(item)?;
        self.load(&path)
            .inspect_err(|e| warn!(target: "scripting", "{:#}", e))
            .ok()
    }

    fn all_sources(&self) -> Vec<ScriptSource> {
        self.paths()
            .iter()
            .filter_map(|path| match self.load(path) {
                Ok(source) => Some(source),
                Err(e) => {
                    warn!(target: "scripting", "{:#}", e);
                    None
                }
            })
            .collect()
    }
}
