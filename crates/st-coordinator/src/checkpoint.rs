//! Checkpoint store
//!
//! The coordinator state is written as pretty-printed JSON after every tick.
//! Writes go to a sibling temporary file which is synced and then renamed
//! over the checkpoint, so a crash leaves either the old or the new
//! snapshot on disk, never a torn one.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use st_core::error::CheckpointError;

use crate::state::CoordinatorState;

/// Durable snapshot location
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Create a store writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Checkpoint file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Replace the checkpoint with `state`
    pub fn save(&self, state: &CoordinatorState) -> Result<(), CheckpointError> {
        let data = serde_json::to_vec_pretty(state).map_err(|source| CheckpointError::Format {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let temp = self.temp_path();
        let mut file = fs::File::create(&temp).map_err(|e| self.io_error(e))?;
        file.write_all(&data).map_err(|e| self.io_error(e))?;
        file.sync_all().map_err(|e| self.io_error(e))?;
        drop(file);

        fs::rename(&temp, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }

    /// Read the checkpoint.
    ///
    /// Returns `Ok(None)` if no checkpoint has been written yet.
    pub fn load(&self) -> Result<Option<CoordinatorState>, CheckpointError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        let state = serde_json::from_slice(&data).map_err(|source| CheckpointError::Format {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(state))
    }
}
