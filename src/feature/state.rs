//! Project state as a fold over feature events.
//!
//! Creation and status transitions are the only mutation primitives. The
//! persisted `features` list is the current fold of `history`, kept alongside
//! it so readers never have to replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::{Feature, FeatureStatus, Transition};
use crate::error::{BuilderError, Result};
use crate::ralph::BlockedReport;

/// One recorded mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FeatureEvent {
    Created {
        feature: Feature,
    },
    Started {
        index: u64,
        at: DateTime<Utc>,
    },
    Passed {
        index: u64,
        at: DateTime<Utc>,
    },
    Skipped {
        index: u64,
        reason: String,
        at: DateTime<Utc>,
    },
    Cleared {
        index: u64,
        at: DateTime<Utc>,
    },
    AttemptFailed {
        index: u64,
        error: String,
        at: DateTime<Utc>,
    },
    Blocked {
        index: u64,
        report: BlockedReport,
        at: DateTime<Utc>,
    },
}

impl FeatureEvent {
    pub fn index(&self) -> u64 {
        match self {
            Self::Created { feature } => feature.index,
            Self::Started { index, .. }
            | Self::Passed { index, .. }
            | Self::Skipped { index, .. }
            | Self::Cleared { index, .. }
            | Self::AttemptFailed { index, .. }
            | Self::Blocked { index, .. } => *index,
        }
    }
}

/// Everything persisted for one project's feature collection
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectState {
    /// Bumped on every successful save; used for optimistic concurrency
    #[serde(default)]
    pub version: u64,

    /// Next index to hand out
    #[serde(default)]
    pub next_index: u64,

    /// Current features ordered by index
    #[serde(default)]
    pub features: Vec<Feature>,

    /// Append-only audit trail
    #[serde(default)]
    pub history: Vec<FeatureEvent>,

    /// Indices created under a batch key, so a retried creation finds them
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub batches: BTreeMap<String, Vec<u64>>,
}

impl ProjectState {
    pub fn feature(&self, index: u64) -> Result<&Feature> {
        self.features
            .iter()
            .find(|f| f.index == index)
            .ok_or(BuilderError::NotFound { index })
    }

    /// Apply an event to the current fold and append it to the history.
    ///
    /// Illegal events are rejected here, so no caller can bypass the
    /// transition graph.
    pub fn record(&mut self, event: FeatureEvent) -> Result<()> {
        apply(&mut self.features, &event)?;
        if let FeatureEvent::Created { feature } = &event {
            self.next_index = self.next_index.max(feature.index + 1);
        }
        self.history.push(event);
        Ok(())
    }

    /// Rebuild the feature list from an event history
    pub fn replay(history: &[FeatureEvent]) -> Result<Vec<Feature>> {
        let mut features = Vec::new();
        for event in history {
            apply(&mut features, event)?;
        }
        Ok(features)
    }

    /// Check that the stored fold matches the history it came from
    pub fn verify_history(&self) -> Result<()> {
        let replayed = Self::replay(&self.history)?;
        if replayed != self.features {
            return Err(BuilderError::validation(
                None,
                "feature list does not match its event history",
            ));
        }
        Ok(())
    }
}

fn apply(features: &mut Vec<Feature>, event: &FeatureEvent) -> Result<()> {
    match event {
        FeatureEvent::Created { feature } => {
            if features.iter().any(|f| f.index >= feature.index) {
                return Err(BuilderError::validation(
                    Some(feature.index),
                    format!("index {} is already taken", feature.index),
                ));
            }
            features.push(feature.clone());
        }
        FeatureEvent::Started { index, at } => transition(features, *index, Transition::Start, *at)?,
        FeatureEvent::Passed { index, at } => {
            require_unblocked(features, *index, "mark passing before its block is cleared")?;
            transition(features, *index, Transition::Pass, *at)?
        }
        FeatureEvent::Skipped { index, reason, at } => {
            transition(features, *index, Transition::Skip, *at)?;
            find_mut(features, *index)?.skip_reason = Some(reason.clone());
        }
        FeatureEvent::Cleared { index, at } => {
            transition(features, *index, Transition::Clear, *at)?;
            find_mut(features, *index)?.blocked = None;
        }
        FeatureEvent::AttemptFailed { index, error, at } => {
            require_unblocked(features, *index, "record an attempt before its block is cleared")?;
            let feature = require_in_progress(features, *index, "record an attempt")?;
            feature.attempt_count += 1;
            feature.last_error = Some(error.clone());
            feature.updated_at = *at;
        }
        FeatureEvent::Blocked { index, report, at } => {
            require_unblocked(features, *index, "be blocked again before its block is cleared")?;
            let feature = require_in_progress(features, *index, "record a block")?;
            feature.last_error = Some(report.failing_step.observed.clone());
            feature.blocked = Some(report.clone());
            feature.updated_at = *at;
        }
    }
    Ok(())
}

fn find_mut(features: &mut [Feature], index: u64) -> Result<&mut Feature> {
    features
        .iter_mut()
        .find(|f| f.index == index)
        .ok_or(BuilderError::NotFound { index })
}

/// A blocked feature only leaves that state through `Cleared` or `Skipped`
fn require_unblocked(features: &mut [Feature], index: u64, action: &'static str) -> Result<()> {
    let feature = find_mut(features, index)?;
    if feature.blocked.is_some() {
        return Err(BuilderError::InvalidTransition {
            index,
            from: feature.status,
            action,
        });
    }
    Ok(())
}

fn require_in_progress<'a>(
    features: &'a mut [Feature],
    index: u64,
    action: &'static str,
) -> Result<&'a mut Feature> {
    let feature = find_mut(features, index)?;
    if feature.status != FeatureStatus::InProgress {
        return Err(BuilderError::InvalidTransition {
            index,
            from: feature.status,
            action,
        });
    }
    Ok(feature)
}

fn transition(
    features: &mut [Feature],
    index: u64,
    transition: Transition,
    at: DateTime<Utc>,
) -> Result<()> {
    let feature = find_mut(features, index)?;
    let next = feature
        .status
        .after(transition)
        .ok_or(BuilderError::InvalidTransition {
            index,
            from: feature.status,
            action: transition.verb(),
        })?;
    if transition == Transition::Start {
        feature.attempt_count = 0;
        feature.last_error = None;
    }
    feature.status = next;
    feature.updated_at = at;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{FeatureCategory, NewFeature};

    fn created(index: u64) -> FeatureEvent {
        FeatureEvent::Created {
            feature: Feature::from_new(
                index,
                NewFeature::new(FeatureCategory::Functional, format!("feature {index}"), ["check"]),
                Utc::now(),
            ),
        }
    }

    #[test]
    fn record_keeps_fold_and_history_in_sync() {
        let mut state = ProjectState::default();
        state.record(created(0)).unwrap();
        state.record(created(1)).unwrap();
        state
            .record(FeatureEvent::Started { index: 1, at: Utc::now() })
            .unwrap();
        state
            .record(FeatureEvent::Skipped {
                index: 1,
                reason: "missing credential".into(),
                at: Utc::now(),
            })
            .unwrap();

        assert_eq!(state.next_index, 2);
        assert_eq!(state.history.len(), 4);
        state.verify_history().unwrap();
        assert_eq!(state.features[1].skip_reason.as_deref(), Some("missing credential"));
    }

    #[test]
    fn illegal_event_is_rejected_and_not_logged() {
        let mut state = ProjectState::default();
        state.record(created(0)).unwrap();
        let err = state
            .record(FeatureEvent::Passed { index: 0, at: Utc::now() })
            .unwrap_err();
        assert!(matches!(err, BuilderError::InvalidTransition { index: 0, .. }));
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.features[0].status, FeatureStatus::Pending);
    }

    #[test]
    fn duplicate_index_is_rejected() {
        let mut state = ProjectState::default();
        state.record(created(3)).unwrap();
        assert!(state.record(created(3)).is_err());
        assert!(state.record(created(1)).is_err());
    }

    #[test]
    fn unknown_index_is_not_found() {
        let mut state = ProjectState::default();
        let err = state
            .record(FeatureEvent::Started { index: 9, at: Utc::now() })
            .unwrap_err();
        assert!(matches!(err, BuilderError::NotFound { index: 9 }));
    }

    fn blocked(index: u64) -> FeatureEvent {
        let failure = crate::ralph::StepFailure {
            step_number: 1,
            step: "check".into(),
            expected: "exit status 0".into(),
            observed: "exit status 1".into(),
        };
        FeatureEvent::Blocked {
            index,
            report: crate::ralph::BlockedReport {
                feature_index: index,
                failing_step: failure.clone(),
                attempts: vec![crate::ralph::AttemptRecord {
                    attempt: 1,
                    failure,
                    fix_summary: None,
                }],
                suggested_action: "fix step 1".into(),
            },
            at: Utc::now(),
        }
    }

    #[test]
    fn blocked_feature_needs_clear_before_passing() {
        let mut state = ProjectState::default();
        state.record(created(0)).unwrap();
        state
            .record(FeatureEvent::Started { index: 0, at: Utc::now() })
            .unwrap();
        state.record(blocked(0)).unwrap();

        for event in [
            FeatureEvent::Passed { index: 0, at: Utc::now() },
            FeatureEvent::AttemptFailed {
                index: 0,
                error: "again".into(),
                at: Utc::now(),
            },
            blocked(0),
        ] {
            let err = state.record(event).unwrap_err();
            assert!(matches!(
                err,
                BuilderError::InvalidTransition {
                    index: 0,
                    from: FeatureStatus::InProgress,
                    ..
                }
            ));
        }
        assert_eq!(state.history.len(), 3);

        state
            .record(FeatureEvent::Cleared { index: 0, at: Utc::now() })
            .unwrap();
        state
            .record(FeatureEvent::Started { index: 0, at: Utc::now() })
            .unwrap();
        state
            .record(FeatureEvent::Passed { index: 0, at: Utc::now() })
            .unwrap();
        assert_eq!(state.features[0].status, FeatureStatus::Passing);
        state.verify_history().unwrap();
    }

    #[test]
    fn blocked_feature_can_still_be_skipped() {
        let mut state = ProjectState::default();
        state.record(created(0)).unwrap();
        state
            .record(FeatureEvent::Started { index: 0, at: Utc::now() })
            .unwrap();
        state.record(blocked(0)).unwrap();
        state
            .record(FeatureEvent::Skipped {
                index: 0,
                reason: "upstream outage".into(),
                at: Utc::now(),
            })
            .unwrap();
        assert_eq!(state.features[0].status, FeatureStatus::Skipped);
    }

    #[test]
    fn tampered_fold_fails_verification() {
        let mut state = ProjectState::default();
        state.record(created(0)).unwrap();
        state.features[0].status = FeatureStatus::Passing;
        assert!(state.verify_history().is_err());
    }
}
