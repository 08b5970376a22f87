//! Router artifacts - requests, requirements documents, bug reports, profiles

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BuilderError, Result};

/// What the requester said the work is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclaredType {
    #[default]
    Unspecified,
    Big,
    Small,
    Bug,
}

impl DeclaredType {
    pub fn as_kind(self) -> Option<RequestKind> {
        match self {
            Self::Unspecified => None,
            Self::Big => Some(RequestKind::Big),
            Self::Small => Some(RequestKind::Small),
            Self::Bug => Some(RequestKind::Bug),
        }
    }
}

impl std::str::FromStr for DeclaredType {
    type Err = BuilderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" | "unspecified" => Ok(Self::Unspecified),
            "big" => Ok(Self::Big),
            "small" => Ok(Self::Small),
            "bug" => Ok(Self::Bug),
            other => Err(BuilderError::validation(
                None,
                format!("unknown request type {other:?}; expected big, small or bug"),
            )),
        }
    }
}

/// Which generation pipeline a request goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Big,
    Small,
    Bug,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Big => "big",
            Self::Small => "small",
            Self::Bug => "bug",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub description: String,
    #[serde(default)]
    pub declared_type: DeclaredType,
}

impl Request {
    pub fn new(description: impl Into<String>, declared_type: DeclaredType) -> Self {
        Self {
            description: description.into(),
            declared_type,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechStack {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub frontend: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub auth: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conventions {
    #[serde(default)]
    pub file_structure: Option<String>,
    #[serde(default)]
    pub state_management: Option<String>,
}

/// What the authoring collaborator knows about the project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectProfile {
    #[serde(default)]
    pub tech_stack: TechStack,
    #[serde(default)]
    pub conventions: Conventions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationPlan {
    #[serde(default)]
    pub unit_tests: Vec<String>,
    #[serde(default)]
    pub integration_tests: Vec<String>,
    #[serde(default)]
    pub manual_verification: Vec<String>,
}

/// Structured breakdown of a request into testable requirements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementsDocument {
    pub title: String,
    pub kind: RequestKind,
    #[serde(default)]
    pub summary: String,
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub affected_areas: Vec<String>,
    #[serde(default)]
    pub validation_plan: ValidationPlan,
    pub estimated_feature_count: usize,
    /// Bug this document fixes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bug_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RequirementsDocument {
    /// Reject documents that cannot be split into features
    pub fn validate(&self) -> Result<()> {
        if self.requirements.is_empty() {
            return Err(BuilderError::validation(
                None,
                format!("requirements document {:?} has no requirements", self.title),
            ));
        }
        for req in &self.requirements {
            if req.id.trim().is_empty() || req.description.trim().is_empty() {
                return Err(BuilderError::validation(
                    None,
                    format!("requirement {:?} needs an id and a description", req.id),
                ));
            }
        }
        Ok(())
    }

    /// Whether any criterion or verification item mentions a regression check
    pub fn has_regression_step(&self) -> bool {
        let mentions = |s: &String| s.to_lowercase().contains("regression");
        self.requirements
            .iter()
            .flat_map(|r| r.acceptance_criteria.iter())
            .chain(self.validation_plan.unit_tests.iter())
            .chain(self.validation_plan.integration_tests.iter())
            .chain(self.validation_plan.manual_verification.iter())
            .any(mentions)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootCause {
    pub summary: String,
    #[serde(default)]
    pub affected_files: Vec<String>,
    #[serde(default)]
    pub code_path: String,
}

/// Root-cause analysis of a reported defect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugReport {
    pub id: String,
    pub title: String,
    pub symptoms: Vec<String>,
    pub reproduction_steps: Vec<String>,
    pub root_cause: RootCause,
    #[serde(default)]
    pub affected_areas: Vec<String>,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(criteria: &[&str]) -> RequirementsDocument {
        RequirementsDocument {
            title: "Fix login".into(),
            kind: RequestKind::Bug,
            summary: String::new(),
            requirements: vec![Requirement {
                id: "R1".into(),
                description: "Fix login".into(),
                acceptance_criteria: criteria.iter().map(|c| c.to_string()).collect(),
            }],
            affected_areas: vec![],
            validation_plan: ValidationPlan::default(),
            estimated_feature_count: 1,
            bug_reference: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn regression_step_is_detected_case_insensitively() {
        assert!(doc(&["Bug no longer reproducible", "Regression test added"]).has_regression_step());
        assert!(!doc(&["Bug no longer reproducible"]).has_regression_step());
    }

    #[test]
    fn empty_document_fails_validation() {
        let mut d = doc(&[]);
        d.requirements.clear();
        assert!(matches!(d.validate(), Err(BuilderError::Validation { .. })));
    }

    #[test]
    fn declared_type_parses() {
        assert_eq!("BIG".parse::<DeclaredType>().unwrap(), DeclaredType::Big);
        assert_eq!("".parse::<DeclaredType>().unwrap(), DeclaredType::Unspecified);
        assert!("huge".parse::<DeclaredType>().is_err());
    }
}
