//! Process-scoped services, injected rather than ambient
//!
//! Anything that would have been a global singleton — preferences, the temp
//! directory, the download cache location — travels in a `SessionContext`
//! handed to constructors.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// User preferences relevant to the analysis pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Normalise decoded audio to peak 1.0 while caching.
    pub normalise_audio: bool,
    /// Cache decoded audio in a temp file rather than in memory.
    pub use_temporary_file_cache: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            normalise_audio: false,
            use_temporary_file_cache: true,
        }
    }
}

impl Preferences {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| crate::error::Error::InvalidState(format!("bad preferences file: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| crate::error::Error::InvalidState(format!("preferences encode: {}", e)))?;
        fs::write(path, text)?;
        Ok(())
    }
}

/// Owner of the process temp root. Decode caches live under it and die
/// with it.
pub struct TempDirectory {
    dir: TempDir,
}

impl TempDirectory {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("annopipe-").tempdir()?;
        info!("temp root at {}", dir.path().display());
        Ok(TempDirectory { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn sub_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// The injected service bundle.
pub struct SessionContext {
    pub preferences: Preferences,
    temp: TempDirectory,
    cache_dir: Option<PathBuf>,
}

impl SessionContext {
    pub fn new() -> Result<Self> {
        Ok(SessionContext {
            preferences: Preferences::default(),
            temp: TempDirectory::new()?,
            cache_dir: None,
        })
    }

    pub fn with_preferences(mut self, preferences: Preferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// Directory for downloaded-file caching; must persist across runs to
    /// be useful.
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }

    pub fn temp(&self) -> &TempDirectory {
        &self.temp
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferences_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");
        let prefs = Preferences {
            normalise_audio: true,
            use_temporary_file_cache: false,
        };
        prefs.save(&path).unwrap();
        let loaded = Preferences::load(&path).unwrap();
        assert!(loaded.normalise_audio);
        assert!(!loaded.use_temporary_file_cache);
    }

    #[test]
    fn test_preferences_defaults_for_missing_fields() {
        let loaded: Preferences = serde_json::from_str("{}").unwrap();
        assert!(!loaded.normalise_audio);
        assert!(loaded.use_temporary_file_cache);
    }

    #[test]
    fn test_temp_directory_scoped() {
        let path;
        {
            let temp = TempDirectory::new().unwrap();
            path = temp.path().to_path_buf();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
