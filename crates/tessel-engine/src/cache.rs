use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tessel_codegen::{CompileWarning, PositionMap};
use tracing::{debug, warn};

use crate::api::HostApi;
use crate::error::EngineError;
use crate::vm::{self, CompiledModule};

/// A compiled script and the warnings produced while generating it
#[derive(Debug, Clone)]
pub struct CompiledScript {
    pub module: Arc<CompiledModule>,
    pub warnings: Vec<CompileWarning>,
}

#[derive(Debug)]
struct CacheEntry {
    source: String,
    compiled: CompiledScript,
}

/// On-disk companion of a cached `.host` file
#[derive(Debug, Serialize, Deserialize)]
struct CachedMap {
    source: String,
    positions: PositionMap,
}

/// Compiles guest source into shared modules, reusing earlier results
pub struct ModuleCache {
    api: Arc<HostApi>,
    entries: Mutex<HashMap<u64, Vec<CacheEntry>>>,
    cache_dir: Option<PathBuf>,
    compiled: AtomicU64,
    hits: AtomicU64,
}

impl ModuleCache {
    pub fn new(api: Arc<HostApi>, cache_dir: Option<PathBuf>) -> Self {
        Self {
            api,
            entries: Mutex::new(HashMap::new()),
            cache_dir,
            compiled: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Vec<CacheEntry>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn source_key(source: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        hasher.finish()
    }

    /// Parse, generate and assemble `source`, or return the cached module
    pub fn compile(&self, source: &str) -> Result<CompiledScript, EngineError> {
        let key = Self::source_key(source);
        if let Some(hit) = self
            .lock()
            .get(&key)
            .and_then(|bucket| bucket.iter().find(|e| e.source == source))
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit.compiled.clone());
        }

        let compiled = match self.load_from_disk(key, source) {
            Some(compiled) => compiled,
            None => {
                let generated = tessel_codegen::compile_source(source, self.api.as_ref())?;
                let module = vm::assemble(&generated.host_source, generated.positions.clone())?;
                if let Err(e) = self.store_to_disk(key, source, &generated.host_source, &generated.positions) {
                    warn!(target: "scripting", "Failed to write module cache: {:#}", e);
                }
                self.compiled.fetch_add(1, Ordering::Relaxed);
                CompiledScript {
                    module: Arc::new(module),
                    warnings: generated.warnings,
                }
            }
        };

        self.lock().entry(key).or_default().push(CacheEntry {
            source: source.to_string(),
            compiled: compiled.clone(),
        });
        Ok(compiled)
    }

    fn paths(dir: &Path, key: u64) -> (PathBuf, PathBuf) {
        (
            dir.join(format!("{:016x}.host", key)),
            dir.join(format!("{:016x}.map.toml", key)),
        )
    }

    fn load_from_disk(&self, key: u64, source: &str) -> Option<CompiledScript> {
        let dir = self.cache_dir.as_ref()?;
        let (host_path, map_path) = Self::paths(dir, key);
        let host = std::fs::read_to_string(&host_path).ok()?;
        let map: CachedMap = toml::from_str(&std::fs::read_to_string(&map_path).ok()?).ok()?;
        if map.source != source {
            return None;
        }
        match vm::assemble(&host, map.positions) {
            Ok(module) => {
                debug!(target: "scripting", "Reused cached module {}", host_path.display());
                Some(CompiledScript {
                    module: Arc::new(module),
                    warnings: Vec::new(),
                })
            }
            Err(e) => {
                warn!(
                    target: "scripting",
                    "Ignoring stale cached module {}: {}",
                    host_path.display(),
                    e
                );
                None
            }
        }
    }

    fn store_to_disk(
        &self,
        key: u64,
        source: &str,
        host: &str,
        positions: &PositionMap,
    ) -> anyhow::Result<()> {
        let Some(dir) = &self.cache_dir else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating cache directory {}", dir.display()))?;
        let (host_path, map_path) = Self::paths(dir, key);
        let map = toml::to_string(&CachedMap {
            source: source.to_string(),
            positions: positions.clone(),
        })?;
        std::fs::write(&host_path, host)
            .with_context(|| format!("writing {}", host_path.display()))?;
        std::fs::write(&map_path, map)
            .with_context(|| format!("writing {}", map_path.display()))?;
        Ok(())
    }

    pub fn api(&self) -> &Arc<HostApi> {
        &self.api
    }

    /// Scripts compiled from source since startup
    pub fn compiled_count(&self) -> u64 {
        self.compiled.load(Ordering::Relaxed)
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "default { state_entry() { llSay(0, \"hi\"); } }";

    #[test]
    fn test_second_compile_is_a_hit() {
        let cache = ModuleCache::new(Arc::new(HostApi::standard()), None);
        let a = cache.compile(SOURCE).unwrap();
        let b = cache.compile(SOURCE).unwrap();
        assert!(Arc::ptr_eq(&a.module, &b.module));
        assert_eq!(cache.compiled_count(), 1);
        assert_eq!(cache.hit_count(), 1);
    }

    #[test]
    fn test_compile_error_is_not_cached() {
        let cache = ModuleCache::new(Arc::new(HostApi::standard()), None);
        let err = cache.compile("default { state_entry() { x = 1; } }").unwrap_err();
        assert!(matches!(err, EngineError::Compile(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disk_cache_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let first = ModuleCache::new(Arc::new(HostApi::standard()), Some(dir.path().to_path_buf()));
        let original = first.compile(SOURCE).unwrap();

        let key = ModuleCache::source_key(SOURCE);
        assert!(dir.path().join(format!("{:016x}.host", key)).exists());
        assert!(dir.path().join(format!("{:016x}.map.toml", key)).exists());

        let second = ModuleCache::new(Arc::new(HostApi::standard()), Some(dir.path().to_path_buf()));
        let reloaded = second.compile(SOURCE).unwrap();
        assert_eq!(second.compiled_count(), 0);
        assert_eq!(reloaded.module.hash, original.module.hash);
        assert_eq!(reloaded.module.positions, original.module.positions);
    }
}
