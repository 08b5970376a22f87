//! Error taxonomy shared by the store, registry, validation loop and router.
//!
//! Every variant maps to a stable kind string, an optional Feature index and a
//! one-line remediation so the CLI can report failures without parsing text.

use std::path::PathBuf;
use thiserror::Error;

use crate::feature::FeatureStatus;

/// Convenience alias used throughout the library
pub type Result<T> = std::result::Result<T, BuilderError>;

/// Errors raised by featureloop operations
#[derive(Error, Debug)]
pub enum BuilderError {
    #[error("feature {index} not found")]
    NotFound { index: u64 },

    #[error("feature {index} cannot {action} while {from}")]
    InvalidTransition {
        index: u64,
        from: FeatureStatus,
        action: &'static str,
    },

    #[error("validation failed: {reason}")]
    Validation { index: Option<u64>, reason: String },

    #[error("stale write to {path}: loaded version {expected}, on-disk version {found}")]
    StaleWrite {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    #[error("timed out after {waited_ms}ms waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("feature {index} still failing after {attempts} validation attempts")]
    MaxRetriesExceeded { index: u64, attempts: u32 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("authoring collaborator failed: {0}")]
    Author(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed document {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt project state {path}: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    #[error("background task failed: {0}")]
    Task(String),

    #[error("malformed config {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl BuilderError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    pub fn validation(index: Option<u64>, reason: impl Into<String>) -> Self {
        Self::Validation {
            index,
            reason: reason.into(),
        }
    }

    /// Stable identifier printed as `error[<kind>]`
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not-found",
            Self::InvalidTransition { .. } => "invalid-transition",
            Self::Validation { .. } => "validation",
            Self::StaleWrite { .. } => "stale-write",
            Self::LockTimeout { .. } => "lock-timeout",
            Self::MaxRetriesExceeded { .. } => "max-retries-exceeded",
            Self::Config(_) => "config",
            Self::Author(_) => "author",
            Self::Io { .. } => "io",
            Self::Json { .. } | Self::CorruptState { .. } => "corrupt-document",
            Self::Task(_) => "internal",
            Self::Toml { .. } => "config",
        }
    }

    /// Feature index the failure refers to, if any
    pub fn index(&self) -> Option<u64> {
        match self {
            Self::NotFound { index }
            | Self::InvalidTransition { index, .. }
            | Self::MaxRetriesExceeded { index, .. } => Some(*index),
            Self::Validation { index, .. } => *index,
            _ => None,
        }
    }

    /// Only contention errors are worth an automatic reload-and-retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::StaleWrite { .. } | Self::LockTimeout { .. })
    }

    /// One actionable line for the operator
    pub fn remediation(&self) -> String {
        match self {
            Self::NotFound { .. } => "run `featureloop list` to see valid feature indices".into(),
            Self::InvalidTransition { index, from, .. } => match from {
                FeatureStatus::Pending => {
                    format!("run `featureloop start {index}` before completing or skipping it")
                }
                FeatureStatus::InProgress => {
                    format!("run `featureloop clear {index}` to return it to pending first")
                }
                FeatureStatus::Passing | FeatureStatus::Skipped => {
                    "terminal features cannot change; create a new feature for follow-up work"
                        .into()
                }
            },
            Self::Validation { .. } => {
                "every feature needs a non-empty description and at least one step".into()
            }
            Self::StaleWrite { .. } => {
                "another process updated the project; re-run the command to reload".into()
            }
            Self::LockTimeout { .. } => {
                "another featureloop process holds the lock; retry once it finishes".into()
            }
            Self::MaxRetriesExceeded { index, .. } => format!(
                "inspect the blocked diagnostic, then `featureloop clear {index}` and retry"
            ),
            Self::Config(_) | Self::Toml { .. } => {
                "check featureloop.toml and the FEATURELOOP_* environment variables".into()
            }
            Self::Author(_) => "check the author command and its credential".into(),
            Self::Io { .. } => "check that the project directory exists and is writable".into(),
            Self::Json { path, .. } | Self::CorruptState { path, .. } => format!(
                "restore {} from version control or remove it to start over",
                path.display()
            ),
            Self::Task(_) => "re-run the command; report it if the failure repeats".into(),
        }
    }

    /// Process exit code; distinct per kind, never 0
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => 3,
            Self::InvalidTransition { .. } => 4,
            Self::Validation { .. } => 5,
            Self::StaleWrite { .. } => 6,
            Self::LockTimeout { .. } => 7,
            Self::MaxRetriesExceeded { .. } => 8,
            Self::Author(_) => 9,
            Self::Json { .. } | Self::CorruptState { .. } => 10,
            Self::Task(_) => 70,
            Self::Io { .. } => 74,
            Self::Config(_) | Self::Toml { .. } => 78,
        }
    }
}
