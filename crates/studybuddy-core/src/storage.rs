use crate::constants::paths;
use crate::error::StudyError;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// Device-local key/value persistence. Every `set` replaces the whole value.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StudyError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StudyError>;
    fn remove(&self, key: &str) -> Result<(), StudyError>;
}

/// One JSON file per key under a data directory.
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Create a store in the default directory (~/.local/share/studybuddy/ on Linux)
    pub fn new() -> Result<Self, StudyError> {
        let base_dir = dirs::data_dir()
            .ok_or_else(|| StudyError::Config("Could not determine data directory".to_string()))?
            .join(paths::DATA_DIR);
        Self::with_dir(base_dir)
    }

    /// Create a store with a custom directory (useful for testing)
    pub fn with_dir(base_dir: PathBuf) -> Result<Self, StudyError> {
        fs::create_dir_all(&base_dir).map_err(|e| {
            StudyError::Config(format!("Failed to create data directory: {}", e))
        })?;

        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StudyError> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        Ok(Some(contents))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StudyError> {
        let path = self.key_path(key);

        // Write-then-rename so a killed process never leaves a half-written record.
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, value)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StudyError> {
        let path = self.key_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// In-process store for tests and for sessions that must not touch disk.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StudyError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StudyError::Config("memory store poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StudyError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StudyError::Config("memory store poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StudyError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StudyError::Config("memory store poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}
