//! Cross-reload state: the only thing that survives a page navigation.

use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoredState {
    pub loop_processing_active: bool,
    pub active_script: Option<String>,
}

/// JSON file store. Writes are serialized so a read-modify-write from two
/// tasks cannot interleave.
pub struct StateStore {
    path: PathBuf,
    write: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<StoredState, StoreError> {
        if !self.path.exists() {
            return Ok(StoredState::default());
        }
        let file = std::fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn save(&self, state: &StoredState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        serde_json::to_writer_pretty(file, state)?;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut StoredState)) -> Result<(), StoreError> {
        let _guard = self.write.lock();
        let mut state = self.load()?;
        apply(&mut state);
        self.save(&state)
    }

    pub fn loop_active(&self) -> Result<bool, StoreError> {
        Ok(self.load()?.loop_processing_active)
    }

    pub fn set_loop_active(&self, active: bool) -> Result<(), StoreError> {
        self.update(|state| state.loop_processing_active = active)
    }

    pub fn set_active_script(&self, script: Option<&str>) -> Result<(), StoreError> {
        self.update(|state| state.active_script = script.map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_as_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        assert_eq!(store.load().unwrap(), StoredState::default());
    }

    #[test]
    fn flags_survive_a_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = StateStore::new(&path);
        store.set_loop_active(true).unwrap();
        store.set_active_script(Some("alphaMatchers")).unwrap();

        let reopened = StateStore::new(&path);
        let state = reopened.load().unwrap();
        assert!(state.loop_processing_active);
        assert_eq!(state.active_script.as_deref(), Some("alphaMatchers"));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"loopProcessingActive\": true"));
    }
}
