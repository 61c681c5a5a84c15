//! Persisted canvas positions, keyed by source id

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::ViewportPosition;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait PositionStore: Send {
    fn load(&self, source: &str) -> Result<Option<ViewportPosition>, StoreError>;
    fn save(&mut self, source: &str, position: ViewportPosition) -> Result<(), StoreError>;
}

/// Keeps positions for the lifetime of the process
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    positions: HashMap<String, ViewportPosition>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl PositionStore for MemoryStore {
    fn load(&self, source: &str) -> Result<Option<ViewportPosition>, StoreError> {
        Ok(self.positions.get(source).copied())
    }

    fn save(&mut self, source: &str, position: ViewportPosition) -> Result<(), StoreError> {
        self.positions.insert(source.to_string(), position);
        Ok(())
    }
}

/// One JSON object mapping source id to position
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, ViewportPosition>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        // A damaged file reads as empty and is replaced on the next save
        match serde_json::from_str(&text) {
            Ok(all) => Ok(all),
            Err(e) => {
                log::warn!("ignoring unreadable position store {}: {}", self.path.display(), e);
                Ok(BTreeMap::new())
            }
        }
    }
}

impl PositionStore for JsonFileStore {
    fn load(&self, source: &str) -> Result<Option<ViewportPosition>, StoreError> {
        Ok(self.read_all()?.remove(source))
    }

    fn save(&mut self, source: &str, position: ViewportPosition) -> Result<(), StoreError> {
        let mut all = self.read_all()?;
        all.insert(source.to_string(), position);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&all)?)?;
        Ok(())
    }
}
