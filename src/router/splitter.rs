//! Requirements document -> feature batch

use super::types::RequirementsDocument;
use crate::feature::{FeatureCategory, NewFeature};

/// One feature per requirement, plus testing features for the validation plan.
///
/// Acceptance criteria become verification steps. A requirement without
/// criteria gets generic implement/verify/test steps so every feature has
/// at least one step.
pub fn split_requirements(doc: &RequirementsDocument, category: FeatureCategory) -> Vec<NewFeature> {
    let mut features: Vec<NewFeature> = doc
        .requirements
        .iter()
        .map(|req| {
            let mut steps: Vec<String> = req
                .acceptance_criteria
                .iter()
                .filter(|c| !c.trim().is_empty())
                .enumerate()
                .map(|(i, criterion)| format!("Step {}: Verify {}", i + 1, criterion.trim()))
                .collect();
            if steps.is_empty() {
                steps = vec![
                    "Step 1: Implement the feature".into(),
                    "Step 2: Verify it works as expected".into(),
                    "Step 3: Run tests".into(),
                ];
            }
            NewFeature::new(category, req.description.trim(), steps).with_requirement(&req.id)
        })
        .collect();

    let plan = &doc.validation_plan;
    if !plan.unit_tests.is_empty() {
        features.push(NewFeature::new(
            FeatureCategory::Testing,
            format!("Create unit tests: {}", plan.unit_tests.join(", ")),
            [
                "Step 1: Create test file(s)",
                "Step 2: Write test cases for each requirement",
                "Step 3: Run tests and verify they pass",
            ],
        ));
    }
    if !plan.integration_tests.is_empty() {
        features.push(NewFeature::new(
            FeatureCategory::Testing,
            format!("Create integration tests: {}", plan.integration_tests.join(", ")),
            [
                "Step 1: Set up test environment",
                "Step 2: Create integration test file(s)",
                "Step 3: Run integration tests",
            ],
        ));
    }
    features
}
