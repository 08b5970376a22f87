//! Persistent Store - versioned, lock-protected project state
//!
//! All reads and writes of the feature collection go through a
//! [`ProjectStore`]. The file-backed store serialises writers with an
//! exclusive lock file and replaces the state document atomically, so readers
//! never observe a half-written file. A version counter on [`ProjectState`]
//! turns lost updates into a
//! [`BuilderError::StaleWrite`](crate::error::BuilderError::StaleWrite).

mod atomic;
mod file;
mod lock;
mod memory;

pub use atomic::{read_json, write_json_atomic};
pub use file::FileStore;
pub use lock::FileLock;
pub use memory::InMemoryStore;

pub use crate::feature::ProjectState;

use crate::error::Result;

/// Abstraction over project state persistence.
pub trait ProjectStore: Send + Sync {
    /// Read the current state. A project with no state yet loads as empty
    /// with version 0.
    fn load(&self) -> Result<ProjectState>;

    /// Persist `state` if nobody else saved since it was loaded.
    ///
    /// On success `state.version` is advanced to the newly written version.
    fn save(&self, state: &mut ProjectState) -> Result<()>;

    /// Load, mutate and save while holding exclusive access.
    ///
    /// Nothing is written if `op` fails.
    fn update<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut ProjectState) -> Result<T>;
}
