//! Advisory sizing checks. Nothing here blocks a transition.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::types::NewFeature;

static AND_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\band\b").expect("valid regex"));
static AND_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\s+and\s+").expect("valid regex"));

const COMPLEXITY_KEYWORDS: &[&str] = &[
    "authentication",
    "oauth",
    "profile",
    "password",
    "two-factor",
    "session",
    "dashboard",
    "admin",
    "settings",
    "notifications",
    "database",
    "api",
    "integration",
    "multi-tenant",
    "real-time",
    "search",
    "filter",
    "pagination",
    "upload",
    "export",
    "import",
    "workflow",
    "pipeline",
    "migration",
    "refactor",
    "redesign",
];

const MULTI_COMPONENT_KEYWORDS: &[&str] = &[
    "full",
    "complete",
    "entire",
    "whole",
    "comprehensive",
    "system",
    "module",
    "feature set",
    "suite",
];

/// Default complexity above which a feature is flagged as too large
pub const DEFAULT_COMPLEXITY_THRESHOLD: u8 = 5;

/// Why a feature looks too big for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SizeWarning {
    /// Description joins several pieces of work with "and"
    Conjunctions {
        count: usize,
        suggestions: Vec<String>,
    },
    /// Heuristic complexity score is above the threshold
    Complexity {
        score: u8,
        threshold: u8,
        suggestions: Vec<String>,
    },
}

impl SizeWarning {
    pub fn message(&self) -> String {
        match self {
            Self::Conjunctions { count, .. } => format!(
                "description uses \"and\" {count} times; consider splitting it into separate features"
            ),
            Self::Complexity { score, threshold, .. } => format!(
                "complexity {score} exceeds threshold {threshold}; consider splitting it"
            ),
        }
    }

    pub fn suggestions(&self) -> &[String] {
        match self {
            Self::Conjunctions { suggestions, .. } | Self::Complexity { suggestions, .. } => {
                suggestions
            }
        }
    }
}

/// Count of the conjunction "and" as a standalone word
pub fn conjunction_count(description: &str) -> usize {
    AND_WORD.find_iter(description).count()
}

/// Score a description on a 1-10 scale
pub fn estimate_complexity(description: &str) -> u8 {
    let lower = description.to_lowercase();
    let words = description.split_whitespace().count();

    let base = match words {
        0..10 => 1.0,
        10..20 => 2.0,
        20..30 => 3.0,
        30..50 => 4.0,
        _ => 5.0,
    };
    let keywords = COMPLEXITY_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(*kw))
        .count() as f64
        * 0.5;
    let multi = MULTI_COMPONENT_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(*kw))
        .count() as f64;
    let conjunctions = (lower.matches(" and ").count() + lower.matches(" with ").count()) as f64 * 0.5;
    let lists = (description.matches(',').count() as f64 * 0.3).min(2.0);

    let total = (base + keywords + multi + conjunctions + lists).round();
    total.clamp(1.0, 10.0) as u8
}

/// Propose smaller pieces for a large description
pub fn suggest_split(description: &str) -> Vec<String> {
    let lower = description.to_lowercase();

    if lower.contains(" and ") {
        let parts: Vec<String> = AND_SPLIT
            .split(description)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .enumerate()
            .map(|(i, p)| format!("Part {}: {p}", i + 1))
            .collect();
        if parts.len() >= 2 {
            return parts;
        }
    }

    if description.matches(',').count() >= 2 {
        let parts: Vec<String> = description
            .split(',')
            .map(str::trim)
            .enumerate()
            .filter(|(_, p)| p.len() > 10)
            .map(|(i, p)| format!("Item {}: {p}", i + 1))
            .collect();
        if !parts.is_empty() {
            return parts;
        }
    }

    let phases: &[&str] = if ["full", "complete", "entire", "comprehensive"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        &[
            "Phase 1: Core functionality / MVP",
            "Phase 2: Additional features",
            "Phase 3: Polish and edge cases",
            "Phase 4: Testing and validation",
        ]
    } else if lower.contains("system") || lower.contains("module") {
        &[
            "Component 1: Data model / schema",
            "Component 2: Backend logic / API",
            "Component 3: Frontend UI",
            "Component 4: Integration and testing",
        ]
    } else {
        &[
            "Step 1: Setup and scaffolding",
            "Step 2: Core implementation",
            "Step 3: Testing and refinement",
        ]
    };
    phases.iter().map(|s| s.to_string()).collect()
}

/// Advisory size check for a feature about to be created
pub fn validate_size(feature: &NewFeature, threshold: u8) -> Vec<SizeWarning> {
    let mut warnings = Vec::new();

    let count = conjunction_count(&feature.description);
    if count > 1 {
        warnings.push(SizeWarning::Conjunctions {
            count,
            suggestions: suggest_split(&feature.description),
        });
    }

    let score = estimate_complexity(&feature.description);
    if score > threshold {
        warnings.push(SizeWarning::Complexity {
            score,
            threshold,
            suggestions: suggest_split(&feature.description),
        });
    }

    if !warnings.is_empty() {
        tracing::warn!(
            description = %feature.description,
            warnings = warnings.len(),
            "Feature looks too large for one session"
        );
    }
    warnings
}
