//! Features - the unit of tracked work and the registry that sequences them
//!
//! ```text
//! pending --start--> in_progress --pass--> passing   (terminal)
//!                    in_progress --skip--> skipped   (terminal)
//!                    in_progress --clear-> pending
//! ```

mod registry;
pub mod sizing;
mod state;
mod types;

pub use registry::{CreatedBatch, FeatureRegistry};
pub use sizing::{SizeWarning, validate_size};
pub use state::{FeatureEvent, ProjectState};
pub use types::*;
