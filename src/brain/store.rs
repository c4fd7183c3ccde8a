//! File-backed storage for brain documents.
//!
//! One JSON file per agent under the configured brains directory. Loads
//! degrade to an empty brain on any read or parse failure; saves are
//! best-effort and the caller decides whether to log or propagate.

use std::path::{Path, PathBuf};

use crate::brain::Brain;
use crate::error::MemoryError;

#[derive(Debug, Clone)]
pub struct BrainStore {
    dir: PathBuf,
}

impl BrainStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the document for a given agent name.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Load a brain, treating a missing or malformed document as empty.
    pub fn load(&self, name: &str) -> Brain {
        Self::load_path(&self.path_for(name))
    }

    /// Load a brain from an explicit path, degrading to empty on failure.
    pub fn load_path(path: &Path) -> Brain {
        match Self::try_load(path) {
            Ok(brain) => brain,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "brain unavailable, starting empty");
                Brain::default()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Brain, MemoryError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write a brain document, creating the directory if needed.
    pub fn save(&self, name: &str, brain: &Brain) -> Result<(), MemoryError> {
        Self::save_path(&self.path_for(name), brain)
    }

    /// Write a brain document to an explicit path.
    pub fn save_path(path: &Path, brain: &Brain) -> Result<(), MemoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(brain)?;
        std::fs::write(path, raw)?;
        tracing::debug!(path = %path.display(), "brain saved");
        Ok(())
    }
}
