//! On-device key-value settings used to mirror session identifiers.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SettingsKey {
    CurrentUserId,
    CurrentRoomId,
    DraftRoomCode,
}

impl SettingsKey {
    pub fn key(&self) -> &'static str {
        match self {
            SettingsKey::CurrentUserId => "current_user_id",
            SettingsKey::CurrentRoomId => "current_room_id",
            SettingsKey::DraftRoomCode => "draft_room_code",
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub trait SettingsStore: Send + Sync {
    fn get(&self, key: SettingsKey) -> Option<String>;
    fn set(&self, key: SettingsKey, value: &str) -> Result<(), SettingsError>;
    fn remove(&self, key: SettingsKey) -> Result<(), SettingsError>;
}

/// Settings persisted as a JSON object in `settings.json`.
///
/// Loaded once on open and rewritten on every change. A missing file is an
/// empty store; a corrupt one is logged and replaced on the next write.
pub struct FileSettingsStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileSettingsStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = Self::load_from_file(&path);
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_file(path: &Path) -> BTreeMap<String, String> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read settings");
                return BTreeMap::new();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding corrupt settings file");
                BTreeMap::new()
            }
        }
    }

    fn save_to_file(&self, values: &BTreeMap<String, String>) -> Result<(), SettingsError> {
        let json = serde_json::to_string_pretty(values)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        // Write to a temp file and rename so a crash never leaves half a file.
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, json)
            .and_then(|_| fs::rename(&temp, &self.path))
            .map_err(|source| SettingsError::Write {
                path: self.path.clone(),
                source,
            })
    }

    /// Apply `change`, persist, and roll the in-memory map back if the write fails.
    fn update(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), SettingsError> {
        let mut values = self.values.lock();
        let previous = values.clone();
        change(&mut values);
        if let Err(e) = self.save_to_file(&values) {
            *values = previous;
            return Err(e);
        }
        Ok(())
    }
}

impl SettingsStore for FileSettingsStore {
    fn get(&self, key: SettingsKey) -> Option<String> {
        self.values.lock().get(key.key()).cloned()
    }

    fn set(&self, key: SettingsKey, value: &str) -> Result<(), SettingsError> {
        self.update(|values| {
            values.insert(key.key().to_string(), value.to_string());
        })
    }

    fn remove(&self, key: SettingsKey) -> Result<(), SettingsError> {
        if self.values.lock().get(key.key()).is_none() {
            return Ok(());
        }
        self.update(|values| {
            values.remove(key.key());
        })
    }
}

#[derive(Default)]
pub struct MemorySettingsStore {
    values: Mutex<BTreeMap<SettingsKey, String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: SettingsKey) -> Option<String> {
        self.values.lock().get(&key).cloned()
    }

    fn set(&self, key: SettingsKey, value: &str) -> Result<(), SettingsError> {
        self.values.lock().insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: SettingsKey) -> Result<(), SettingsError> {
        self.values.lock().remove(&key);
        Ok(())
    }
}
