//! Knowledge Base - append-only, deduplicated project learnings
//!
//! Patterns, gotchas and common errors discovered while implementing
//! features. Entries are never edited or removed; re-adding an equivalent
//! entry is a no-op, except that a repeated common error bumps its frequency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ProjectPaths;
use crate::error::{BuilderError, Result};
use crate::store::{FileLock, read_json, write_json_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningKind {
    Pattern,
    Gotcha,
    CommonError,
}

impl fmt::Display for LearningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pattern => "pattern",
            Self::Gotcha => "gotcha",
            Self::CommonError => "common_error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEntry {
    pub kind: LearningKind,
    pub text: String,
    /// Context for a pattern, reason for a gotcha, fix for an error
    pub rationale: String,
    #[serde(default = "default_frequency")]
    pub frequency: u32,
    pub added_at: DateTime<Utc>,
}

fn default_frequency() -> u32 {
    1
}

/// What an add call did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AddOutcome {
    Added,
    Matched { frequency: u32 },
}

impl AddOutcome {
    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added)
    }
}

/// On-disk shape of `knowledge.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    #[serde(default)]
    pub patterns: Vec<LearningEntry>,
    #[serde(default)]
    pub gotchas: Vec<LearningEntry>,
    #[serde(default)]
    pub common_errors: Vec<LearningEntry>,
}

impl KnowledgeDocument {
    fn entries(&self, kind: LearningKind) -> &Vec<LearningEntry> {
        match kind {
            LearningKind::Pattern => &self.patterns,
            LearningKind::Gotcha => &self.gotchas,
            LearningKind::CommonError => &self.common_errors,
        }
    }

    fn entries_mut(&mut self, kind: LearningKind) -> &mut Vec<LearningEntry> {
        match kind {
            LearningKind::Pattern => &mut self.patterns,
            LearningKind::Gotcha => &mut self.gotchas,
            LearningKind::CommonError => &mut self.common_errors,
        }
    }

    fn add(&mut self, kind: LearningKind, text: &str, rationale: &str) -> AddOutcome {
        let key = dedup_key(text);
        let entries = self.entries_mut(kind);
        if let Some(existing) = entries.iter_mut().find(|e| dedup_key(&e.text) == key) {
            if kind == LearningKind::CommonError {
                existing.frequency += 1;
            }
            return AddOutcome::Matched {
                frequency: existing.frequency,
            };
        }
        entries.push(LearningEntry {
            kind,
            text: text.trim().to_string(),
            rationale: rationale.trim().to_string(),
            frequency: 1,
            added_at: Utc::now(),
        });
        AddOutcome::Added
    }
}

/// Case-insensitive, whitespace-insensitive identity of an entry
fn dedup_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Handle to a project's knowledge document
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl KnowledgeBase {
    pub fn open(paths: &ProjectPaths, lock_timeout: Duration) -> Self {
        Self {
            path: paths.knowledge(),
            lock_path: paths.knowledge_lock(),
            lock_timeout,
        }
    }

    pub fn add_pattern(&self, text: &str, context: &str) -> Result<AddOutcome> {
        self.add(LearningKind::Pattern, text, context)
    }

    pub fn add_gotcha(&self, warning: &str, reason: &str) -> Result<AddOutcome> {
        self.add(LearningKind::Gotcha, warning, reason)
    }

    pub fn add_common_error(&self, error: &str, fix: &str) -> Result<AddOutcome> {
        self.add(LearningKind::CommonError, error, fix)
    }

    pub fn add(&self, kind: LearningKind, text: &str, rationale: &str) -> Result<AddOutcome> {
        if text.trim().is_empty() {
            return Err(BuilderError::validation(None, format!("{kind} text is empty")));
        }

        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout)?;
        let mut doc = self.all()?;
        let outcome = doc.add(kind, text, rationale);
        if !outcome.is_added() && kind != LearningKind::CommonError {
            debug!(%kind, "Learning already recorded");
            return Ok(outcome);
        }
        write_json_atomic(&self.path, &doc)?;
        info!(%kind, ?outcome, "Recorded learning");
        Ok(outcome)
    }

    pub fn list(&self, kind: LearningKind) -> Result<Vec<LearningEntry>> {
        Ok(self.all()?.entries(kind).clone())
    }

    pub fn all(&self) -> Result<KnowledgeDocument> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn kb(dir: &std::path::Path) -> KnowledgeBase {
        KnowledgeBase::open(&ProjectPaths::new(dir), Duration::from_secs(1))
    }

    #[test]
    fn duplicate_pattern_is_stored_once() {
        let dir = tempdir().unwrap();
        let kb = kb(dir.path());
        assert_eq!(
            kb.add_pattern("Use zustand for client state", "frequent updates").unwrap(),
            AddOutcome::Added
        );
        let again = kb
            .add_pattern("  use ZUSTAND for client   state", "other words")
            .unwrap();
        assert!(!again.is_added());
        let patterns = kb.list(LearningKind::Pattern).unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].rationale, "frequent updates");
    }

    #[test]
    fn kinds_dedup_independently() {
        let dir = tempdir().unwrap();
        let kb = kb(dir.path());
        kb.add_pattern("retry on 429", "rate limits").unwrap();
        assert!(kb.add_gotcha("retry on 429", "can loop forever").unwrap().is_added());
        let doc = kb.all().unwrap();
        assert_eq!(doc.patterns.len(), 1);
        assert_eq!(doc.gotchas.len(), 1);
    }

    #[test]
    fn repeated_error_bumps_frequency() {
        let dir = tempdir().unwrap();
        let kb = kb(dir.path());
        kb.add_common_error("Module not found: sharp", "npm install sharp")
            .unwrap();
        let outcome = kb
            .add_common_error("module not found: sharp", "npm install sharp")
            .unwrap();
        assert_eq!(outcome, AddOutcome::Matched { frequency: 2 });

        let errors = kb.list(LearningKind::CommonError).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].frequency, 2);
    }

    #[test]
    fn empty_text_is_rejected() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            kb(dir.path()).add_gotcha("   ", "nothing"),
            Err(BuilderError::Validation { .. })
        ));
    }
}
