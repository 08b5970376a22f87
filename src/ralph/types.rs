//! Ralph types - loop configuration, diagnostics and completion sentinels

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::error::{BuilderError, Result};

/// Ralph configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RalphConfig {
    /// Attempts before a feature is reported blocked
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Timeout in seconds for a single verification step or fix
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_step_timeout_secs() -> u64 {
    300
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

/// Result of running one verification step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Passed,
    Failed { expected: String, observed: String },
}

/// The step that stopped an attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    /// 1-based position in the feature's steps
    pub step_number: usize,
    pub step: String,
    pub expected: String,
    pub observed: String,
}

/// One failed attempt and what was tried afterwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub failure: StepFailure,
    #[serde(default)]
    pub fix_summary: Option<String>,
}

/// Structured diagnostic for a feature that exhausted its attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedReport {
    pub feature_index: u64,
    pub failing_step: StepFailure,
    pub attempts: Vec<AttemptRecord>,
    pub suggested_action: String,
}

impl BlockedReport {
    pub(crate) fn new(feature_index: u64, attempts: Vec<AttemptRecord>) -> Option<Self> {
        let failing_step = attempts.last()?.failure.clone();
        let repeated = attempts
            .iter()
            .all(|a| a.failure.step_number == failing_step.step_number);
        let suggested_action = if repeated {
            format!(
                "step {} failed on every attempt; review it by hand, then `featureloop clear {}`",
                failing_step.step_number, feature_index
            )
        } else {
            format!(
                "failures moved between steps; stabilise the feature, then `featureloop clear {}`",
                feature_index
            )
        };
        Some(Self {
            feature_index,
            failing_step,
            attempts,
            suggested_action,
        })
    }
}

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Attempting,
    Diagnosing,
    Fixing,
    Validated,
    Blocked,
}

/// Progress notification emitted on phase changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopEvent {
    pub feature_index: u64,
    pub attempt: u32,
    pub phase: LoopPhase,
}

/// Terminal result of one validation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Validated { feature_index: u64, attempts: u32 },
    Blocked(BlockedReport),
}

impl ValidationOutcome {
    pub fn feature_index(&self) -> u64 {
        match self {
            Self::Validated { feature_index, .. } => *feature_index,
            Self::Blocked(report) => report.feature_index,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Validated { attempts, .. } => *attempts,
            Self::Blocked(report) => report.attempts.len() as u32,
        }
    }

    pub fn sentinel(&self) -> Sentinel {
        match self {
            Self::Validated { feature_index, .. } => Sentinel::Validated(*feature_index),
            Self::Blocked(report) => Sentinel::Blocked(report.feature_index),
        }
    }

    /// Blocked becomes [`BuilderError::MaxRetriesExceeded`]
    pub fn into_result(self) -> Result<u32> {
        match self {
            Self::Validated { attempts, .. } => Ok(attempts),
            Self::Blocked(report) => Err(BuilderError::MaxRetriesExceeded {
                index: report.feature_index,
                attempts: report.attempts.len() as u32,
            }),
        }
    }
}

/// Completion marker printed for non-interactive callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    Validated(u64),
    Blocked(u64),
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validated(index) => write!(f, "<promise>FEATURE_{index}_VALIDATED</promise>"),
            Self::Blocked(index) => write!(f, "<promise>FEATURE_{index}_BLOCKED</promise>"),
        }
    }
}

static SENTINEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<promise>FEATURE_(\d+)_(VALIDATED|BLOCKED)</promise>").expect("valid regex")
});

/// Find the last sentinel in free-form output
pub fn detect_sentinel(text: &str) -> Option<Sentinel> {
    let caps = SENTINEL_RE.captures_iter(text).last()?;
    let index = caps[1].parse().ok()?;
    match &caps[2] {
        "VALIDATED" => Some(Sentinel::Validated(index)),
        _ => Some(Sentinel::Blocked(index)),
    }
}
