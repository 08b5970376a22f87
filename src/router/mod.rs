//! Request Router & generation pipeline
//!
//! ```text
//! big   -> profile -> draft requirements -> [approval] -> split -> create
//! small -> profile -> requirements -> split -> create
//! bug   -> profile -> bug report -> fix requirements (+ regression) -> split -> create
//! ```

mod author;
mod pipeline;
mod policy;
mod splitter;
mod types;

pub use author::{Author, CommandAuthor, HeuristicAuthor};
pub use pipeline::{ApprovalRecord, PendingApproval, Pipeline, PipelineOutcome};
pub use policy::{ClassificationPolicy, DEFAULT_BIG_THRESHOLD, KeywordPolicy, classify};
pub use splitter::split_requirements;
pub use types::*;
