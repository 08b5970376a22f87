//! Ralph - bounded self-correction loop
//!
//! A feature's verification steps are attempted in order. A failure is
//! diagnosed and handed to a fixer, then the feature is attempted again, up to
//! `max_attempts`. The loop ends `Validated` or `Blocked` and announces it
//! with a sentinel line so non-interactive callers can detect completion.

mod types;
mod validation_loop;

pub use types::*;
pub use validation_loop::*;
