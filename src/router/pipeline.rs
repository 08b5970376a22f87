//! Generation pipeline - classify, author, split, create
//!
//! Big requests stop at an approval gate: the draft is persisted to
//! `.featureloop/pending_approval.json` and the call returns. A later
//! `approve` creates the features; approving twice creates them once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::author::Author;
use super::policy::{ClassificationPolicy, DEFAULT_BIG_THRESHOLD, KeywordPolicy, classify};
use super::splitter::split_requirements;
use super::types::*;
use crate::config::ProjectPaths;
use crate::error::{BuilderError, Result};
use crate::feature::{FeatureCategory, FeatureRegistry, SizeWarning};
use crate::store::{FileLock, ProjectStore, read_json, write_json_atomic};

const PROFILE_FILE: &str = "project_profile.json";
const PRD_FILE: &str = "prd.json";
const BUG_REPORT_FILE: &str = "bug_report.json";
const PENDING_FILE: &str = "pending_approval.json";

const REGRESSION_CRITERION: &str = "Regression test reproduces the original bug and now passes";

/// A big request's draft, waiting for a human decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: String,
    pub request: Request,
    pub document: RequirementsDocument,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub approved: Option<ApprovalRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approved_at: DateTime<Utc>,
    pub indices: Vec<u64>,
}

/// Where a submission ended up
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    AwaitingApproval {
        approval_id: String,
        title: String,
        requirements: usize,
        estimated_feature_count: usize,
    },
    Created {
        kind: RequestKind,
        indices: Vec<u64>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<(u64, SizeWarning)>,
    },
    NeedsReclassification {
        classified: RequestKind,
        reason: String,
    },
    Rejected {
        approval_id: String,
    },
}

pub struct Pipeline<'a, A, S: ProjectStore> {
    paths: ProjectPaths,
    author: A,
    policy: Box<dyn ClassificationPolicy>,
    registry: &'a FeatureRegistry<S>,
    big_threshold: usize,
    lock_timeout: Duration,
}

impl<'a, A: Author, S: ProjectStore + Clone + 'static> Pipeline<'a, A, S> {
    pub fn new(paths: ProjectPaths, author: A, registry: &'a FeatureRegistry<S>) -> Self {
        Self {
            paths,
            author,
            policy: Box::new(KeywordPolicy),
            registry,
            big_threshold: DEFAULT_BIG_THRESHOLD,
            lock_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_policy(mut self, policy: impl ClassificationPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_big_threshold(mut self, threshold: usize) -> Self {
        self.big_threshold = threshold;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    async fn lock(&self) -> Result<FileLock> {
        FileLock::acquire_async(&self.paths.pipeline_lock(), self.lock_timeout).await
    }

    fn pending(&self) -> Result<Option<PendingApproval>> {
        read_json(&self.paths.artifact(PENDING_FILE))
    }

    /// Classify a request and drive it through its pipeline
    pub async fn submit(&self, request: Request) -> Result<PipelineOutcome> {
        if request.description.trim().is_empty() {
            return Err(BuilderError::validation(None, "request description is empty"));
        }
        let _lock = self.lock().await?;
        if let Some(pending) = self.pending()?
            && pending.approved.is_none()
        {
            return Err(BuilderError::validation(
                None,
                format!(
                    "draft {} is awaiting approval; run `featureloop approve` or `featureloop reject` first",
                    pending.id
                ),
            ));
        }

        let kind = classify(&request, self.policy.as_ref(), self.big_threshold);
        info!(%kind, declared = ?request.declared_type, "Routing request");

        let profile = self.author.profile(self.paths.root()).await?;
        write_json_atomic(&self.paths.artifact(PROFILE_FILE), &profile)?;

        match kind {
            RequestKind::Big => self.submit_big(request, &profile).await,
            RequestKind::Small => self.submit_small(request, &profile).await,
            RequestKind::Bug => self.submit_bug(request, &profile).await,
        }
    }

    async fn submit_big(&self, request: Request, profile: &ProjectProfile) -> Result<PipelineOutcome> {
        let document = self
            .author
            .draft_requirements(&request, RequestKind::Big, profile)
            .await?;
        document.validate()?;
        write_json_atomic(&self.paths.artifact(PRD_FILE), &document)?;

        let pending = PendingApproval {
            id: uuid::Uuid::new_v4().to_string(),
            request,
            document,
            created_at: Utc::now(),
            approved: None,
        };
        write_json_atomic(&self.paths.artifact(PENDING_FILE), &pending)?;
        info!(approval_id = %pending.id, "Draft awaiting approval");

        Ok(PipelineOutcome::AwaitingApproval {
            approval_id: pending.id,
            title: pending.document.title.clone(),
            requirements: pending.document.requirements.len(),
            estimated_feature_count: pending.document.estimated_feature_count,
        })
    }

    async fn submit_small(&self, request: Request, profile: &ProjectProfile) -> Result<PipelineOutcome> {
        let document = self
            .author
            .draft_requirements(&request, RequestKind::Small, profile)
            .await?;
        document.validate()?;
        write_json_atomic(&self.paths.artifact(PRD_FILE), &document)?;

        let size = document.estimated_feature_count.max(document.requirements.len());
        if request.declared_type.as_kind().is_none() && size > self.big_threshold {
            warn!(size, threshold = self.big_threshold, "Small request drafted as big");
            return Ok(PipelineOutcome::NeedsReclassification {
                classified: RequestKind::Small,
                reason: format!(
                    "the drafted document has {size} features, above the big threshold of {}; \
                     resubmit with --type big (approval gate) or --type small",
                    self.big_threshold
                ),
            });
        }

        let features = split_requirements(&document, FeatureCategory::Functional);
        let batch = self.registry.blocking(move |r| r.create_bulk(features)).await?;
        Ok(PipelineOutcome::Created {
            kind: RequestKind::Small,
            indices: batch.indices,
            warnings: batch.warnings,
        })
    }

    async fn submit_bug(&self, request: Request, profile: &ProjectProfile) -> Result<PipelineOutcome> {
        let bug = self.author.triage_bug(&request, profile).await?;
        write_json_atomic(&self.paths.artifact(BUG_REPORT_FILE), &bug)?;
        info!(bug = %bug.id, severity = ?bug.severity, "Bug triaged");

        let mut document = self.author.fix_requirements(&bug, profile).await?;
        if let Err(err) = document.validate() {
            return Ok(PipelineOutcome::NeedsReclassification {
                classified: RequestKind::Bug,
                reason: format!("no fix could be derived from the bug report ({err}); resubmit with --type small"),
            });
        }
        if !document.has_regression_step()
            && let Some(first) = document.requirements.first_mut()
        {
            debug!(bug = %bug.id, "Adding regression criterion to fix document");
            first.acceptance_criteria.push(REGRESSION_CRITERION.to_string());
        }
        write_json_atomic(&self.paths.artifact(PRD_FILE), &document)?;

        let features = split_requirements(&document, FeatureCategory::Bugfix);
        let batch = self.registry.blocking(move |r| r.create_bulk(features)).await?;
        Ok(PipelineOutcome::Created {
            kind: RequestKind::Bug,
            indices: batch.indices,
            warnings: batch.warnings,
        })
    }

    /// Resume a suspended big request. Approving an approved draft returns
    /// the features created the first time.
    ///
    /// Creation is keyed by the draft id inside the registry's own update, so
    /// a lost approval record cannot create the batch a second time.
    pub async fn approve(&self, approval_id: Option<&str>) -> Result<PipelineOutcome> {
        let _lock = self.lock().await?;
        let mut pending = self.expect_pending(approval_id)?;

        if let Some(record) = &pending.approved {
            info!(approval_id = %pending.id, "Draft already approved");
            return Ok(PipelineOutcome::Created {
                kind: RequestKind::Big,
                indices: record.indices.clone(),
                warnings: Vec::new(),
            });
        }

        let key = pending.id.clone();
        let features = split_requirements(&pending.document, FeatureCategory::Functional);
        let batch = self
            .registry
            .blocking(move |r| r.create_bulk_once(&key, features))
            .await?;
        pending.approved = Some(ApprovalRecord {
            approved_at: Utc::now(),
            indices: batch.indices.clone(),
        });
        write_json_atomic(&self.paths.artifact(PENDING_FILE), &pending)?;
        info!(approval_id = %pending.id, created = batch.indices.len(), "Draft approved");

        Ok(PipelineOutcome::Created {
            kind: RequestKind::Big,
            indices: batch.indices,
            warnings: batch.warnings,
        })
    }

    /// Discard a draft that has not been approved
    pub async fn reject(&self, approval_id: Option<&str>) -> Result<PipelineOutcome> {
        let _lock = self.lock().await?;
        let pending = self.expect_pending(approval_id)?;
        if pending.approved.is_some() {
            return Err(BuilderError::validation(
                None,
                format!("draft {} was already approved; its features exist", pending.id),
            ));
        }
        let path = self.paths.artifact(PENDING_FILE);
        std::fs::remove_file(&path).map_err(|err| BuilderError::io(&path, err))?;
        info!(approval_id = %pending.id, "Draft rejected");
        Ok(PipelineOutcome::Rejected {
            approval_id: pending.id,
        })
    }

    fn expect_pending(&self, approval_id: Option<&str>) -> Result<PendingApproval> {
        let pending = self
            .pending()?
            .ok_or_else(|| BuilderError::validation(None, "nothing is awaiting approval"))?;
        if let Some(id) = approval_id
            && id != pending.id
        {
            return Err(BuilderError::validation(
                None,
                format!("approval id {id} does not match the pending draft {}", pending.id),
            ));
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureStatus;
    use crate::router::HeuristicAuthor;
    use crate::store::InMemoryStore;
    use tempfile::tempdir;

    struct Estimate(usize);

    impl ClassificationPolicy for Estimate {
        fn is_bug(&self, _: &str) -> bool {
            false
        }
        fn estimate_feature_count(&self, _: &str) -> usize {
            self.0
        }
    }

    #[tokio::test]
    async fn big_request_waits_for_approval() {
        let dir = tempdir().unwrap();
        let registry = FeatureRegistry::new(InMemoryStore::new());
        let pipeline = Pipeline::new(ProjectPaths::new(dir.path()), HeuristicAuthor, &registry)
            .with_policy(Estimate(8));

        let outcome = pipeline
            .submit(Request::new(
                "Build a billing portal with invoices, refunds and a usage chart",
                DeclaredType::Unspecified,
            ))
            .await
            .unwrap();
        let PipelineOutcome::AwaitingApproval { approval_id, .. } = outcome else {
            panic!("expected approval gate, got {outcome:?}");
        };
        assert_eq!(registry.stats().unwrap().total, 0);
        assert!(dir.path().join(".featureloop/pending_approval.json").exists());

        // A second submission cannot jump the gate
        assert!(pipeline
            .submit(Request::new("Add a footer link to the privacy page", DeclaredType::Small))
            .await
            .is_err());

        let first = pipeline.approve(Some(&approval_id)).await.unwrap();
        let second = pipeline.approve(None).await.unwrap();
        assert_eq!(first, second);
        let PipelineOutcome::Created { indices, .. } = first else {
            panic!("expected created");
        };
        assert!(!indices.is_empty());
        assert_eq!(registry.stats().unwrap().total as usize, indices.len());
        assert!(pipeline.reject(None).await.is_err());
    }

    #[tokio::test]
    async fn lost_approval_record_does_not_duplicate_features() {
        let dir = tempdir().unwrap();
        let registry = FeatureRegistry::new(InMemoryStore::new());
        let pipeline = Pipeline::new(ProjectPaths::new(dir.path()), HeuristicAuthor, &registry);
        pipeline
            .submit(Request::new("Add team workspaces", DeclaredType::Big))
            .await
            .unwrap();

        // The draft as it was before approval, as if the record write never landed
        let pending_path = dir.path().join(".featureloop/pending_approval.json");
        let unapproved = std::fs::read(&pending_path).unwrap();
        let first = pipeline.approve(None).await.unwrap();
        let total = registry.stats().unwrap().total;
        std::fs::write(&pending_path, &unapproved).unwrap();

        let second = pipeline.approve(None).await.unwrap();
        assert_eq!(registry.stats().unwrap().total, total);
        match (first, second) {
            (
                PipelineOutcome::Created { indices: a, .. },
                PipelineOutcome::Created { indices: b, .. },
            ) => assert_eq!(a, b),
            other => panic!("unexpected outcomes {other:?}"),
        }
    }

    #[tokio::test]
    async fn reject_discards_the_draft() {
        let dir = tempdir().unwrap();
        let registry = FeatureRegistry::new(InMemoryStore::new());
        let pipeline = Pipeline::new(ProjectPaths::new(dir.path()), HeuristicAuthor, &registry);

        pipeline
            .submit(Request::new("Add team workspaces", DeclaredType::Big))
            .await
            .unwrap();
        assert!(pipeline.approve(Some("not-the-id")).await.is_err());
        assert!(matches!(
            pipeline.reject(None).await.unwrap(),
            PipelineOutcome::Rejected { .. }
        ));
        assert!(pipeline.approve(None).await.is_err());
        assert_eq!(registry.stats().unwrap().total, 0);
    }

    #[tokio::test]
    async fn small_request_creates_features_directly() {
        let dir = tempdir().unwrap();
        let registry = FeatureRegistry::new(InMemoryStore::new());
        let pipeline = Pipeline::new(ProjectPaths::new(dir.path()), HeuristicAuthor, &registry);

        let outcome = pipeline
            .submit(Request::new("Add a dark mode toggle to the header", DeclaredType::Unspecified))
            .await
            .unwrap();
        assert!(matches!(outcome, PipelineOutcome::Created { kind: RequestKind::Small, .. }));
        let next = registry.get_next().unwrap().unwrap();
        assert_eq!(next.status, FeatureStatus::Pending);
        assert_eq!(next.requirement_ref.as_deref(), Some("R1"));
        assert!(dir.path().join(".featureloop/prd.json").exists());
    }

    #[tokio::test]
    async fn oversized_small_draft_needs_reclassification() {
        let dir = tempdir().unwrap();
        let registry = FeatureRegistry::new(InMemoryStore::new());
        let pipeline = Pipeline::new(ProjectPaths::new(dir.path()), HeuristicAuthor, &registry)
            .with_policy(Estimate(1))
            .with_big_threshold(2);

        let outcome = pipeline
            .submit(Request::new(
                "Add invoice export, refund handling, usage charts and email receipts",
                DeclaredType::Unspecified,
            ))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            PipelineOutcome::NeedsReclassification { classified: RequestKind::Small, .. }
        ));
        assert_eq!(registry.stats().unwrap().total, 0);
    }

    #[tokio::test]
    async fn bug_request_creates_bugfix_features_with_regression_step() {
        let dir = tempdir().unwrap();
        let registry = FeatureRegistry::new(InMemoryStore::new());
        let pipeline = Pipeline::new(ProjectPaths::new(dir.path()), HeuristicAuthor, &registry);

        let outcome = pipeline
            .submit(Request::new(
                "Checkout fails to apply discount codes",
                DeclaredType::Unspecified,
            ))
            .await
            .unwrap();
        assert!(matches!(outcome, PipelineOutcome::Created { kind: RequestKind::Bug, .. }));

        let features = registry.list().unwrap();
        let fix = &features[0];
        assert_eq!(fix.category, FeatureCategory::Bugfix);
        assert!(fix.steps.iter().any(|s| s.to_lowercase().contains("regression")));
        assert!(dir.path().join(".featureloop/bug_report.json").exists());
    }
}
