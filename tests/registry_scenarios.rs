//! End-to-end tests for the feature registry over the file-backed store
//!
//! Each test works in its own temporary project directory, so the lock file,
//! the state document and the version counter are exercised exactly as the
//! CLI uses them.

use std::collections::HashSet;
use std::time::Duration;

use featureloop::BuilderError;
use featureloop::config::ProjectPaths;
use featureloop::feature::{FeatureCategory, FeatureRegistry, FeatureStatus, NewFeature};
use featureloop::store::{FileStore, ProjectState, ProjectStore};
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn project() -> (TempDir, ProjectPaths) {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    (dir, paths)
}

fn registry(paths: &ProjectPaths) -> FeatureRegistry<FileStore> {
    FeatureRegistry::new(FileStore::for_project(paths, Duration::from_secs(5))).with_retries(20)
}

fn feature(description: &str) -> NewFeature {
    NewFeature::new(
        FeatureCategory::Functional,
        description,
        ["Step 1: Open the page", "Step 2: Verify the result"],
    )
}

// ============================================================================
// Selection
// ============================================================================

mod selection {
    use super::*;

    /// [passing, pending, pending] hands out the lowest pending index
    #[test]
    fn next_skips_passing_features() {
        let (_dir, paths) = project();
        let reg = registry(&paths);
        reg.create_bulk(vec![feature("Login"), feature("Logout"), feature("Profile")])
            .unwrap();
        reg.mark_in_progress(0).unwrap();
        reg.mark_passing(0).unwrap();

        let next = reg.get_next().unwrap().unwrap();
        assert_eq!(next.index, 1);
        assert_eq!(next.status, FeatureStatus::Pending);
    }

    #[test]
    fn next_is_none_when_all_terminal() {
        let (_dir, paths) = project();
        let reg = registry(&paths);
        reg.create_bulk(vec![feature("Login"), feature("Logout")]).unwrap();
        reg.mark_in_progress(0).unwrap();
        reg.mark_passing(0).unwrap();
        reg.mark_in_progress(1).unwrap();
        reg.mark_skip(1, "needs a payment provider sandbox").unwrap();

        assert!(reg.get_next().unwrap().is_none());
        assert!(reg.is_complete().unwrap());
    }

    #[test]
    fn empty_project_is_not_complete() {
        let (_dir, paths) = project();
        let reg = registry(&paths);
        assert!(reg.get_next().unwrap().is_none());
        assert!(!reg.is_complete().unwrap());
        assert_eq!(reg.stats().unwrap().total, 0);
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

mod lifecycle {
    use super::*;

    #[test]
    fn skipped_feature_is_counted_and_frozen() {
        let (_dir, paths) = project();
        let reg = registry(&paths);
        reg.create_bulk(vec![feature("Export CSV")]).unwrap();
        reg.mark_in_progress(0).unwrap();
        let skipped = reg.mark_skip(0, "blocked on upstream API").unwrap();
        assert_eq!(skipped.skip_reason.as_deref(), Some("blocked on upstream API"));

        let stats = reg.stats().unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.pending, 0);

        let err = reg.mark_passing(0).unwrap_err();
        assert!(matches!(err, BuilderError::InvalidTransition { index: 0, .. }));
    }

    #[test]
    fn passing_never_reverts() {
        let (_dir, paths) = project();
        let reg = registry(&paths);
        reg.create_bulk(vec![feature("Search")]).unwrap();
        reg.mark_in_progress(0).unwrap();
        reg.mark_passing(0).unwrap();

        assert!(reg.mark_in_progress(0).is_err());
        assert!(reg.clear_in_progress(0).is_err());
        assert!(reg.mark_skip(0, "changed my mind").is_err());
        assert_eq!(reg.get(0).unwrap().status, FeatureStatus::Passing);
    }

    #[test]
    fn pending_cannot_be_marked_passing() {
        let (_dir, paths) = project();
        let reg = registry(&paths);
        reg.create_bulk(vec![feature("Search")]).unwrap();
        let err = reg.mark_passing(0).unwrap_err();
        assert!(matches!(
            err,
            BuilderError::InvalidTransition {
                from: FeatureStatus::Pending,
                ..
            }
        ));
    }

    #[test]
    fn clear_returns_feature_to_queue() {
        let (_dir, paths) = project();
        let reg = registry(&paths);
        reg.create_bulk(vec![feature("Search"), feature("Filters")]).unwrap();
        reg.mark_in_progress(0).unwrap();
        assert_eq!(reg.get_next().unwrap().unwrap().index, 1);

        reg.clear_in_progress(0).unwrap();
        assert_eq!(reg.get_next().unwrap().unwrap().index, 0);
    }

    #[test]
    fn unknown_index_is_not_found() {
        let (_dir, paths) = project();
        let reg = registry(&paths);
        let err = reg.mark_in_progress(42).unwrap_err();
        assert!(matches!(err, BuilderError::NotFound { index: 42 }));
    }
}

// ============================================================================
// Creation
// ============================================================================

mod creation {
    use super::*;

    #[test]
    fn indices_keep_increasing_across_batches() {
        let (_dir, paths) = project();
        let reg = registry(&paths);
        let first = reg.create_bulk(vec![feature("A"), feature("B")]).unwrap();
        let second = reg.create_bulk(vec![feature("C")]).unwrap();
        assert_eq!(first.indices, vec![0, 1]);
        assert_eq!(second.indices, vec![2]);
    }

    #[test]
    fn invalid_batch_creates_nothing() {
        let (_dir, paths) = project();
        let reg = registry(&paths);
        let mut bad = feature("No steps");
        bad.steps.clear();

        let err = reg.create_bulk(vec![feature("Fine"), bad]).unwrap_err();
        assert!(matches!(err, BuilderError::Validation { .. }));
        assert_eq!(reg.stats().unwrap().total, 0);
    }

    #[test]
    fn oversized_feature_is_created_with_warning() {
        let (_dir, paths) = project();
        let reg = registry(&paths).with_complexity_threshold(2);
        let big = NewFeature::new(
            FeatureCategory::Functional,
            "Build the dashboard and the settings page and the export wizard",
            (1..=9).map(|i| format!("Step {i}: Verify part {i}")),
        );
        let batch = reg.create_bulk(vec![big]).unwrap();
        assert_eq!(batch.indices, vec![0]);
        assert!(!batch.warnings.is_empty());
        assert_eq!(reg.stats().unwrap().pending, 1);
    }
}

// ============================================================================
// Persistence
// ============================================================================

mod persistence {
    use super::*;

    #[test]
    fn state_survives_reopen() {
        let (_dir, paths) = project();
        {
            let reg = registry(&paths);
            reg.create_bulk(vec![feature("Login"), feature("Logout")]).unwrap();
            reg.mark_in_progress(1).unwrap();
        }

        let reopened = registry(&paths);
        let features = reopened.list().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[1].status, FeatureStatus::InProgress);
        assert_eq!(features[0].steps, feature("Login").steps);
    }

    #[test]
    fn serialized_state_reproduces_collection() {
        let (_dir, paths) = project();
        let reg = registry(&paths);
        reg.create_bulk(vec![feature("Login"), feature("Logout"), feature("Profile")])
            .unwrap();
        reg.mark_in_progress(0).unwrap();
        reg.mark_passing(0).unwrap();
        reg.mark_in_progress(2).unwrap();
        reg.mark_skip(2, "missing credential").unwrap();

        let state = reg.store().load().unwrap();
        let json = serde_json::to_string_pretty(&state).unwrap();
        let restored: ProjectState = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, state);
        let statuses: Vec<_> = restored.features.iter().map(|f| f.status).collect();
        assert_eq!(
            statuses,
            [FeatureStatus::Passing, FeatureStatus::Pending, FeatureStatus::Skipped]
        );
        restored.verify_history().unwrap();
    }

    #[test]
    fn history_is_append_only() {
        let (_dir, paths) = project();
        let reg = registry(&paths);
        reg.create_bulk(vec![feature("Login")]).unwrap();
        let before = reg.store().load().unwrap();

        reg.mark_in_progress(0).unwrap();
        reg.mark_passing(0).unwrap();
        let after = reg.store().load().unwrap();

        assert!(after.version > before.version);
        assert_eq!(after.history[..before.history.len()], before.history[..]);
        assert_eq!(after.history.len(), before.history.len() + 2);
    }

    #[test]
    fn stale_state_is_rejected() {
        let (_dir, paths) = project();
        let store = FileStore::for_project(&paths, Duration::from_secs(5));
        let reg = FeatureRegistry::new(store.clone());
        reg.create_bulk(vec![feature("Login")]).unwrap();

        let mut stale = store.load().unwrap();
        reg.mark_in_progress(0).unwrap();

        let err = store.save(&mut stale).unwrap_err();
        assert!(matches!(err, BuilderError::StaleWrite { .. }));
        assert!(err.is_recoverable());
    }
}

// ============================================================================
// Concurrency
// ============================================================================

mod concurrency {
    use super::*;

    #[test]
    fn concurrent_writers_never_share_an_index() {
        let (_dir, paths) = project();
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let paths = paths.clone();
                std::thread::spawn(move || {
                    let reg = registry(&paths);
                    (0..5)
                        .flat_map(|n| {
                            reg.create_bulk(vec![feature(&format!("Worker {worker} item {n}"))])
                                .unwrap()
                                .indices
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for index in handle.join().unwrap() {
                assert!(seen.insert(index), "index {index} assigned twice");
            }
        }
        assert_eq!(seen.len(), 20);
        assert_eq!(registry(&paths).stats().unwrap().total, 20);
    }
}
