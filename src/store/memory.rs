//! In-memory implementation of ProjectStore
//!
//! Used for tests and for dry runs that must not touch the project directory.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

use super::{ProjectState, ProjectStore};
use crate::error::{BuilderError, Result};

/// In-memory store with the same version semantics as the file store.
///
/// Clones share one state, like handles onto the same file.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<ProjectState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing state, e.g. a fixture
    pub fn with_state(state: ProjectState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }
}

fn check_version(current: &ProjectState, candidate: &ProjectState) -> Result<()> {
    if current.version != candidate.version {
        return Err(BuilderError::StaleWrite {
            path: PathBuf::from("<memory>"),
            expected: candidate.version,
            found: current.version,
        });
    }
    Ok(())
}

impl ProjectStore for InMemoryStore {
    fn load(&self) -> Result<ProjectState> {
        Ok(self.state.lock().clone())
    }

    fn save(&self, state: &mut ProjectState) -> Result<()> {
        let mut current = self.state.lock();
        check_version(&current, state)?;
        state.version += 1;
        *current = state.clone();
        Ok(())
    }

    fn update<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut ProjectState) -> Result<T>,
    {
        let mut current = self.state.lock();
        let mut working = current.clone();
        let out = op(&mut working)?;
        working.version += 1;
        *current = working;
        Ok(out)
    }
}
