//! Script file change detection for hot reloading

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, warn};

use crate::sources::SCRIPT_EXTENSION;

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(1000);

/// Differences since the previous scan
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub changed: Vec<PathBuf>,
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl ScanResult {
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty() || !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Polls a script directory and reports added, changed and removed scripts
pub struct ScriptScanner {
    script_dir: PathBuf,
    scan_interval: Duration,
    last_scan: Option<Instant>,
    cached_state: HashMap<PathBuf, SystemTime>,
}

impl ScriptScanner {
    pub fn new(script_dir: PathBuf) -> Self {
        Self::with_interval(script_dir, DEFAULT_SCAN_INTERVAL)
    }

    /// Files already present are treated as known, not added
    pub fn with_interval(script_dir: PathBuf, scan_interval: Duration) -> Self {
        let cached_state = scripts_in_dir(&script_dir);
        Self {
            script_dir,
            scan_interval,
            last_scan: None,
            cached_state,
        }
    }

    pub fn should_scan(&self) -> bool {
        self.last_scan
            .map_or(true, |last| last.elapsed() >= self.scan_interval)
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    pub fn scan_changes(&mut self) -> ScanResult {
        self.last_scan = Some(Instant::now());
        let current = scripts_in_dir(&self.script_dir);
        let mut result = ScanResult::default();

        for (path, modified) in &current {
            match self.cached_state.get(path) {
                Some(cached) if cached != modified => {
                    debug!(target: "scripting", "Script changed: {}", path.display());
                    result.changed.push(path.clone());
                }
                Some(_) => {}
                None => {
                    debug!(target: "scripting", "Script added: {}", path.display());
                    result.added.push(path.clone());
                }
            }
        }
        for path in self.cached_state.keys() {
            if !current.contains_key(path) {
                debug!(target: "scripting", "Script removed: {}", path.display());
                result.removed.push(path.clone());
            }
        }
        result.changed.sort();
        result.added.sort();
        result.removed.sort();

        self.cached_state = current;
        result
    }
}

/// Script files in `dir` with their modification times
pub fn scripts_in_dir(dir: &Path) -> HashMap<PathBuf, SystemTime> {
    let mut scripts = HashMap::new();
    if !dir.exists() {
        debug!(target: "scripting", "Script directory does not exist: {}", dir.display());
        return scripts;
    }
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(target: "scripting", "Failed to read script directory {}: {}", dir.display(), e);
            return scripts;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some(SCRIPT_EXTENSION) {
            continue;
        }
        match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => {
                scripts.insert(path, modified);
            }
            Err(e) => {
                warn!(target: "scripting", "Failed to read metadata for {}: {}", path.display(), e);
            }
        }
    }
    scripts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_existing_files_are_not_added() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("door.lsl"), "default { }").unwrap();
        let mut scanner = ScriptScanner::new(temp_dir.path().to_path_buf());

        assert!(scanner.should_scan());
        assert!(!scanner.scan_changes().has_changes());
        assert!(!scanner.should_scan());
    }

    #[test]
    fn test_detects_added_changed_and_removed() {
        let temp_dir = TempDir::new().unwrap();
        let door = temp_dir.path().join("door.lsl");
        let lamp = temp_dir.path().join("lamp.lsl");
        fs::write(&door, "default { }").unwrap();
        let mut scanner = ScriptScanner::new(temp_dir.path().to_path_buf());

        fs::write(&lamp, "default { }").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "not a script").unwrap();
        let result = scanner.scan_changes();
        assert_eq!(result.added, vec![lamp.clone()]);
        assert!(result.changed.is_empty());

        // Some filesystems only keep whole-second modification times
        std::thread::sleep(Duration::from_millis(1100));
        let mut file = File::options().append(true).open(&door).unwrap();
        file.write_all(b"\n").unwrap();
        drop(file);
        fs::remove_file(&lamp).unwrap();

        let result = scanner.scan_changes();
        assert_eq!(result.changed, vec![door]);
        assert_eq!(result.removed, vec![lamp]);
        assert!(result.added.is_empty());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let mut scanner = ScriptScanner::new(temp_dir.path().join("absent"));
        assert!(!scanner.scan_changes().has_changes());
    }
}
