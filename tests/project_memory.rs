//! Knowledge base and session log persistence across handles

use std::time::Duration;

use featureloop::config::ProjectPaths;
use featureloop::knowledge::{AddOutcome, KnowledgeBase, LearningKind};
use featureloop::session_log::SessionLog;

const LOCK: Duration = Duration::from_secs(5);

#[test]
fn duplicate_learning_is_matched_not_stored() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());

    let kb = KnowledgeBase::open(&paths, LOCK);
    assert!(kb.add_pattern("Use repository structs for DB access", "src/db").unwrap().is_added());

    // A second handle sees the first one's write and folds case and spacing
    let other = KnowledgeBase::open(&paths, LOCK);
    let outcome = other
        .add_pattern("use  repository structs for db access", "")
        .unwrap();
    assert!(!outcome.is_added());
    assert_eq!(other.list(LearningKind::Pattern).unwrap().len(), 1);
}

#[test]
fn repeated_error_counts_frequency() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    let kb = KnowledgeBase::open(&paths, LOCK);

    kb.add_common_error("EADDRINUSE on port 3000", "kill the stale dev server")
        .unwrap();
    let outcome = kb
        .add_common_error("EADDRINUSE on port 3000", "kill the stale dev server")
        .unwrap();
    assert_eq!(outcome, AddOutcome::Matched { frequency: 2 });

    let doc = KnowledgeBase::open(&paths, LOCK).all().unwrap();
    assert_eq!(doc.common_errors.len(), 1);
    assert_eq!(doc.common_errors[0].frequency, 2);
    assert!(doc.patterns.is_empty());
    assert!(doc.gotchas.is_empty());
}

#[test]
fn session_log_numbers_sessions_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    let log = SessionLog::open(&paths, LOCK);

    assert_eq!(log.next_session_number().unwrap(), 1);
    log.append(1, "Initialized project with 12 features").unwrap();
    log.append(1, "Feature 0 passing").unwrap();
    let next = log.next_session_number().unwrap();
    assert_eq!(next, 2);
    log.append(next, "Resumed at feature 1").unwrap();

    let entries = SessionLog::open(&paths, LOCK).entries().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2].session, 2);
    assert_eq!(entries[0].message, "Initialized project with 12 features");
    assert!(
        std::fs::read_to_string(paths.session_log())
            .unwrap()
            .contains("Session 2: Resumed at feature 1")
    );
}
