//! File-backed project store

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::atomic::{read_json, write_json_atomic};
use super::lock::FileLock;
use super::{ProjectState, ProjectStore};
use crate::config::ProjectPaths;
use crate::error::{BuilderError, Result};

/// Stores the project state as one JSON document next to a lock file
#[derive(Debug, Clone)]
pub struct FileStore {
    state_path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl FileStore {
    pub fn new(state_path: PathBuf, lock_path: PathBuf, lock_timeout: Duration) -> Self {
        Self {
            state_path,
            lock_path,
            lock_timeout,
        }
    }

    /// Store for the standard layout of a project directory
    pub fn for_project(paths: &ProjectPaths, lock_timeout: Duration) -> Self {
        Self::new(paths.features(), paths.features_lock(), lock_timeout)
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(&self.lock_path, self.lock_timeout)
    }

    /// Load and check that the stored features are the fold of the history
    fn read_state(&self) -> Result<ProjectState> {
        let state: ProjectState = read_json(&self.state_path)?.unwrap_or_default();
        state
            .verify_history()
            .map_err(|err| BuilderError::CorruptState {
                path: self.state_path.clone(),
                reason: err.to_string(),
            })?;
        Ok(state)
    }

    /// Caller must hold the lock
    fn write_checked(&self, state: &mut ProjectState) -> Result<()> {
        let on_disk = self.read_state()?.version;
        if on_disk != state.version {
            tracing::warn!(
                path = %self.state_path.display(),
                expected = state.version,
                found = on_disk,
                "Rejected stale write"
            );
            return Err(BuilderError::StaleWrite {
                path: self.state_path.clone(),
                expected: state.version,
                found: on_disk,
            });
        }

        state.version += 1;
        if let Err(err) = write_json_atomic(&self.state_path, state) {
            state.version -= 1;
            return Err(err);
        }
        tracing::debug!(
            path = %self.state_path.display(),
            version = state.version,
            features = state.features.len(),
            "Saved project state"
        );
        Ok(())
    }
}

impl ProjectStore for FileStore {
    fn load(&self) -> Result<ProjectState> {
        self.read_state()
    }

    fn save(&self, state: &mut ProjectState) -> Result<()> {
        let _lock = self.lock()?;
        self.write_checked(state)
    }

    fn update<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut ProjectState) -> Result<T>,
    {
        let _lock = self.lock()?;
        let mut state = self.read_state()?;
        let out = op(&mut state)?;
        self.write_checked(&mut state)?;
        Ok(out)
    }
}
