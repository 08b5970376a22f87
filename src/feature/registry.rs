//! Feature Registry - selection, transitions and bulk creation

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::sizing::{self, SizeWarning};
use super::state::FeatureEvent;
use super::types::{Feature, FeatureStats, FeatureStatus, NewFeature};
use crate::error::{BuilderError, Result};
use crate::ralph::BlockedReport;
use crate::store::{ProjectState, ProjectStore};

/// Result of a bulk creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatedBatch {
    /// Indices assigned, in input order
    pub indices: Vec<u64>,

    /// Advisory size warnings keyed by the new index
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<(u64, SizeWarning)>,
}

/// The state machine over a project's features
#[derive(Clone)]
pub struct FeatureRegistry<S: ProjectStore> {
    store: S,
    retries: u32,
    complexity_threshold: u8,
}

impl<S: ProjectStore> FeatureRegistry<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            retries: 3,
            complexity_threshold: sizing::DEFAULT_COMPLEXITY_THRESHOLD,
        }
    }

    /// How many times a stale write or lock timeout is retried
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_complexity_threshold(mut self, threshold: u8) -> Self {
        self.complexity_threshold = threshold;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run a read-modify-write, reloading and retrying on contention
    fn mutate<T>(&self, mut op: impl FnMut(&mut ProjectState) -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match self.store.update(|state| op(state)) {
                Err(err) if err.is_recoverable() && attempt < self.retries => {
                    attempt += 1;
                    warn!(attempt, error = %err, "Store contention, reloading");
                }
                other => return other,
            }
        }
    }

    /// Append features, assigning indices after the current maximum.
    ///
    /// The whole batch is rejected if any feature lacks a description or steps.
    pub fn create_bulk(&self, features: Vec<NewFeature>) -> Result<CreatedBatch> {
        self.create(None, features)
    }

    /// Like [`create_bulk`](Self::create_bulk), but at most once per `key`.
    ///
    /// The key and the assigned indices are saved in the same write as the
    /// features. Calling again with the same key returns those indices and
    /// creates nothing.
    pub fn create_bulk_once(&self, key: &str, features: Vec<NewFeature>) -> Result<CreatedBatch> {
        self.create(Some(key), features)
    }

    fn create(&self, key: Option<&str>, features: Vec<NewFeature>) -> Result<CreatedBatch> {
        for (pos, feature) in features.iter().enumerate() {
            if feature.description.trim().is_empty() {
                return Err(BuilderError::validation(
                    None,
                    format!("feature #{} in batch has an empty description", pos + 1),
                ));
            }
            if feature.steps.is_empty() || feature.steps.iter().any(|s| s.trim().is_empty()) {
                return Err(BuilderError::validation(
                    None,
                    format!(
                        "feature #{} in batch (\"{}\") has no verification steps",
                        pos + 1,
                        feature.description
                    ),
                ));
            }
        }

        let advisories: Vec<Vec<SizeWarning>> = features
            .iter()
            .map(|f| sizing::validate_size(f, self.complexity_threshold))
            .collect();

        let (indices, fresh) = self.mutate(|state| {
            if let Some(existing) = key.and_then(|k| state.batches.get(k)) {
                return Ok((existing.clone(), false));
            }
            let now = Utc::now();
            let mut indices = Vec::with_capacity(features.len());
            for new in &features {
                let index = state.next_index;
                state.record(FeatureEvent::Created {
                    feature: Feature::from_new(index, new.clone(), now),
                })?;
                indices.push(index);
            }
            if let Some(key) = key {
                state.batches.insert(key.to_string(), indices.clone());
            }
            Ok((indices, true))
        })?;

        if !fresh {
            info!(key, indices = ?indices, "Batch already created");
            return Ok(CreatedBatch {
                indices,
                warnings: Vec::new(),
            });
        }

        let warnings = indices
            .iter()
            .zip(advisories)
            .flat_map(|(index, ws)| ws.into_iter().map(move |w| (*index, w)))
            .collect();

        info!(created = indices.len(), first = ?indices.first(), "Created features");
        Ok(CreatedBatch { indices, warnings })
    }

    /// Lowest-index pending feature
    pub fn get_next(&self) -> Result<Option<Feature>> {
        let state = self.store.load()?;
        Ok(state
            .features
            .into_iter()
            .filter(|f| f.status == FeatureStatus::Pending)
            .min_by_key(|f| f.index))
    }

    pub fn get(&self, index: u64) -> Result<Feature> {
        self.store.load()?.feature(index).cloned()
    }

    /// All features ordered by index
    pub fn list(&self) -> Result<Vec<Feature>> {
        let mut features = self.store.load()?.features;
        features.sort_by_key(|f| f.index);
        Ok(features)
    }

    fn transition(&self, index: u64, event: impl Fn() -> FeatureEvent) -> Result<Feature> {
        let feature = self.mutate(|state| {
            state.record(event())?;
            state.feature(index).cloned()
        })?;
        info!(index, status = %feature.status, "Feature transitioned");
        Ok(feature)
    }

    /// pending -> in_progress
    pub fn mark_in_progress(&self, index: u64) -> Result<Feature> {
        self.transition(index, || FeatureEvent::Started { index, at: Utc::now() })
    }

    /// in_progress -> passing
    pub fn mark_passing(&self, index: u64) -> Result<Feature> {
        self.transition(index, || FeatureEvent::Passed { index, at: Utc::now() })
    }

    /// in_progress -> skipped; only for external blockers
    pub fn mark_skip(&self, index: u64, reason: &str) -> Result<Feature> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(BuilderError::validation(
                Some(index),
                "a skip reason is required",
            ));
        }
        self.transition(index, || FeatureEvent::Skipped {
            index,
            reason: reason.to_string(),
            at: Utc::now(),
        })
    }

    /// in_progress -> pending; also clears a blocked diagnostic
    pub fn clear_in_progress(&self, index: u64) -> Result<Feature> {
        self.transition(index, || FeatureEvent::Cleared { index, at: Utc::now() })
    }

    /// Count a failed validation attempt against an in-progress feature
    pub fn record_attempt_failure(&self, index: u64, error: &str) -> Result<Feature> {
        let feature = self.mutate(|state| {
            state.record(FeatureEvent::AttemptFailed {
                index,
                error: error.to_string(),
                at: Utc::now(),
            })?;
            state.feature(index).cloned()
        })?;
        debug!(index, attempts = feature.attempt_count, "Recorded failed attempt");
        Ok(feature)
    }

    /// Persist the diagnostic of a blocked validation; the feature stays in progress
    pub fn record_blocked(&self, index: u64, report: &BlockedReport) -> Result<Feature> {
        let feature = self.mutate(|state| {
            state.record(FeatureEvent::Blocked {
                index,
                report: report.clone(),
                at: Utc::now(),
            })?;
            state.feature(index).cloned()
        })?;
        warn!(index, step = report.failing_step.step_number, "Feature blocked");
        Ok(feature)
    }

    /// Up to `n` passing features chosen uniformly at random
    pub fn get_for_regression(&self, n: usize) -> Result<Vec<Feature>> {
        self.get_for_regression_with(n, &mut rand::rng())
    }

    pub fn get_for_regression_with<R: Rng + ?Sized>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> Result<Vec<Feature>> {
        let passing: Vec<Feature> = self
            .store
            .load()?
            .features
            .into_iter()
            .filter(|f| f.status == FeatureStatus::Passing)
            .collect();
        let amount = n.min(passing.len());
        let picked = rand::seq::index::sample(rng, passing.len(), amount);
        Ok(picked.into_iter().map(|i| passing[i].clone()).collect())
    }

    pub fn stats(&self) -> Result<FeatureStats> {
        Ok(FeatureStats::tally(&self.store.load()?.features))
    }

    /// True once features exist and none is pending or in progress
    pub fn is_complete(&self) -> Result<bool> {
        let stats = self.stats()?;
        Ok(stats.total > 0 && stats.pending == 0 && stats.in_progress == 0)
    }

    /// Advisory split suggestion; never blocks anything
    pub fn validate_size(&self, feature: &NewFeature) -> Vec<SizeWarning> {
        sizing::validate_size(feature, self.complexity_threshold)
    }
}

impl<S: ProjectStore + Clone + 'static> FeatureRegistry<S> {
    /// Run registry work on the blocking pool.
    ///
    /// Store calls may wait on the lock file, so async callers go through here.
    pub async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> Result<T> + Send + 'static,
    {
        let registry = self.clone();
        match tokio::task::spawn_blocking(move || op(&registry)).await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => Err(BuilderError::Task(err.to_string())),
        }
    }
}
