use std::path::PathBuf;

use directories::ProjectDirs;

/// Platform-specific locations for configuration, data and cache files
///
/// Follows the XDG base directory layout on Linux and the platform
/// conventions elsewhere.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    dirs: ProjectDirs,
}

impl ProjectPaths {
    /// Returns `None` when no home directory can be determined
    pub fn new(name: &str) -> Option<Self> {
        ProjectDirs::from("", "", name).map(|dirs| Self { dirs })
    }

    pub fn config_dir(&self) -> PathBuf {
        self.dirs.config_dir().to_path_buf()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dirs.data_dir().to_path_buf()
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dirs.cache_dir().to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_contain_name() {
        if let Some(paths) = ProjectPaths::new("tessel") {
            assert!(paths.config_dir().to_string_lossy().contains("tessel"));
            assert!(paths.data_dir().to_string_lossy().contains("tessel"));
            assert!(paths.cache_dir().to_string_lossy().contains("tessel"));
        }
    }
}
