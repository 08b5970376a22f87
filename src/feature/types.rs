//! Feature types - records, lifecycle states and creation input

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ralph::BlockedReport;

/// What kind of work a feature represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCategory {
    Setup,
    #[default]
    Functional,
    Integration,
    Testing,
    Bugfix,
}

/// Lifecycle state of a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    #[default]
    Pending,
    InProgress,
    Passing,
    Skipped,
}

impl FeatureStatus {
    /// `passing` and `skipped` never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passing | Self::Skipped)
    }

    /// The legal transition graph. `None` means the move is forbidden.
    pub fn after(self, transition: Transition) -> Option<Self> {
        match (self, transition) {
            (Self::Pending, Transition::Start) => Some(Self::InProgress),
            (Self::InProgress, Transition::Pass) => Some(Self::Passing),
            (Self::InProgress, Transition::Skip) => Some(Self::Skipped),
            (Self::InProgress, Transition::Clear) => Some(Self::Pending),
            _ => None,
        }
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Passing => "passing",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Status-changing operations on a single feature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Pass,
    Skip,
    Clear,
}

impl Transition {
    pub fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pass => "mark passing",
            Self::Skip => "skip",
            Self::Clear => "clear in-progress",
        }
    }
}

/// A tracked unit of work.
///
/// `description` and `steps` are fixed at creation; everything the registry
/// changes afterwards goes through a [`FeatureEvent`](super::FeatureEvent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Sequential, never reused
    pub index: u64,

    #[serde(default)]
    pub category: FeatureCategory,

    /// Short title
    #[serde(default)]
    pub name: String,

    pub description: String,

    /// Verification steps, in the order they must be checked
    pub steps: Vec<String>,

    #[serde(default)]
    pub status: FeatureStatus,

    /// Requirement id in the originating requirements document (e.g. "R3")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement_ref: Option<String>,

    /// Failed validation attempts since the feature was last started
    #[serde(default)]
    pub attempt_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,

    /// Set when the validation loop gave up; cleared by `clear_in_progress`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<BlockedReport>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Feature {
    /// Build the record for a validated creation request
    pub fn from_new(index: u64, new: NewFeature, now: DateTime<Utc>) -> Self {
        let name = new
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| default_name(&new.description));
        Self {
            index,
            category: new.category,
            name,
            description: new.description,
            steps: new.steps,
            status: FeatureStatus::Pending,
            requirement_ref: new.requirement_ref,
            attempt_count: 0,
            last_error: None,
            skip_reason: None,
            blocked: None,
            created_at: now,
            updated_at: now,
        }
    }
}

fn default_name(description: &str) -> String {
    let first = description.split('.').next().unwrap_or(description).trim();
    if first.chars().count() > 60 {
        let cut: String = first.chars().take(57).collect();
        format!("{cut}...")
    } else {
        first.to_string()
    }
}

/// Input to bulk creation; the registry assigns the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFeature {
    #[serde(default)]
    pub category: FeatureCategory,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub steps: Vec<String>,

    #[serde(default, alias = "prd_requirement")]
    pub requirement_ref: Option<String>,
}

impl NewFeature {
    pub fn new(
        category: FeatureCategory,
        description: impl Into<String>,
        steps: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            category,
            name: None,
            description: description.into(),
            steps: steps.into_iter().map(Into::into).collect(),
            requirement_ref: None,
        }
    }

    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirement_ref = Some(requirement.into());
        self
    }
}

/// Counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub passing: usize,
    pub skipped: usize,
    /// Share of features passing, rounded to one decimal
    pub percentage: f64,
}

impl FeatureStats {
    pub fn tally<'a>(features: impl IntoIterator<Item = &'a Feature>) -> Self {
        let mut stats = Self::default();
        for feature in features {
            stats.total += 1;
            match feature.status {
                FeatureStatus::Pending => stats.pending += 1,
                FeatureStatus::InProgress => stats.in_progress += 1,
                FeatureStatus::Passing => stats.passing += 1,
                FeatureStatus::Skipped => stats.skipped += 1,
            }
        }
        if stats.total > 0 {
            let pct = stats.passing as f64 / stats.total as f64 * 100.0;
            stats.percentage = (pct * 10.0).round() / 10.0;
        }
        stats
    }
}
