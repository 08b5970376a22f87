//! Authoring collaborators - produce profiles, requirements and bug reports

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::types::*;
use crate::error::{BuilderError, Result};

/// Produces the artifacts the pipeline feeds into the registry
#[async_trait]
pub trait Author: Send + Sync {
    async fn profile(&self, project_dir: &Path) -> Result<ProjectProfile>;

    async fn draft_requirements(
        &self,
        request: &Request,
        kind: RequestKind,
        profile: &ProjectProfile,
    ) -> Result<RequirementsDocument>;

    async fn triage_bug(&self, request: &Request, profile: &ProjectProfile) -> Result<BugReport>;

    async fn fix_requirements(
        &self,
        bug: &BugReport,
        profile: &ProjectProfile,
    ) -> Result<RequirementsDocument>;
}

#[async_trait]
impl Author for Box<dyn Author> {
    async fn profile(&self, project_dir: &Path) -> Result<ProjectProfile> {
        (**self).profile(project_dir).await
    }

    async fn draft_requirements(
        &self,
        request: &Request,
        kind: RequestKind,
        profile: &ProjectProfile,
    ) -> Result<RequirementsDocument> {
        (**self).draft_requirements(request, kind, profile).await
    }

    async fn triage_bug(&self, request: &Request, profile: &ProjectProfile) -> Result<BugReport> {
        (**self).triage_bug(request, profile).await
    }

    async fn fix_requirements(
        &self,
        bug: &BugReport,
        profile: &ProjectProfile,
    ) -> Result<RequirementsDocument> {
        (**self).fix_requirements(bug, profile).await
    }
}

/// Offline, deterministic author built from keyword heuristics
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAuthor;

const FRONTEND: &[(&str, &str)] = &[
    ("react", "React"),
    ("vue", "Vue"),
    ("@angular/core", "Angular"),
    ("svelte", "Svelte"),
    ("solid-js", "Solid"),
];
const BACKEND: &[(&str, &str)] = &[
    ("express", "Express.js"),
    ("fastify", "Fastify"),
    ("koa", "Koa"),
    ("hono", "Hono"),
];
const DATABASE: &[(&str, &str)] = &[
    ("firebase-admin", "Firestore"),
    ("firebase", "Firestore"),
    ("mongoose", "MongoDB"),
    ("mongodb", "MongoDB"),
    ("pg", "PostgreSQL"),
    ("mysql2", "MySQL"),
    ("prisma", "Prisma"),
    ("drizzle-orm", "Drizzle"),
];
const AUTH: &[(&str, &str)] = &[
    ("next-auth", "NextAuth"),
    ("@auth0/auth0-react", "Auth0"),
    ("passport", "Passport.js"),
    ("firebase", "Firebase Auth"),
];
const PYTHON_BACKENDS: &[(&str, &str)] =
    &[("fastapi", "FastAPI"), ("flask", "Flask"), ("django", "Django")];
const RUST_BACKENDS: &[(&str, &str)] =
    &[("axum", "Axum"), ("actix-web", "Actix Web"), ("warp", "Warp"), ("rocket", "Rocket")];

const FEATURE_AREAS: &[(&str, &[&str])] = &[
    ("auth", &["auth", "login", "logout", "password", "session"]),
    ("database", &["database", "db", "store", "save", "fetch"]),
    ("ui", &["button", "form", "page", "component", "display", "show"]),
    ("api", &["api", "endpoint", "request", "response"]),
];
const BUG_AREAS: &[(&str, &[&str])] = &[
    ("authentication", &["login", "logout", "auth", "password", "session", "token"]),
    ("database", &["database", "db", "save", "store", "query", "data"]),
    ("ui", &["button", "form", "page", "display", "render", "component"]),
    ("api", &["api", "endpoint", "request", "response", "fetch"]),
    ("performance", &["slow", "timeout", "loading", "performance"]),
];

static REQUIREMENT_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[,;]|\band\b|\bwith\b").expect("valid regex"));
static NUMBERED_STEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.\s*([^.]+)").expect("valid regex"));
static SYMPTOMS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"error[:\s]+([^.]+)", "Error"),
        (r"crash(?:es|ing)?[:\s]+([^.]+)", "Crash"),
        (r"not working[:\s]*([^.]*)", "Not working"),
        (r"fails? to ([^.]+)", "Fails to"),
        (r"broken ([^.]+)", "Broken"),
        (r"wrong ([^.]+)", "Wrong"),
    ]
    .into_iter()
    .map(|(re, label)| (Regex::new(re).expect("valid regex"), label))
    .collect()
});

fn lookup(table: &[(&str, &'static str)], found: impl Fn(&str) -> bool) -> Option<String> {
    table
        .iter()
        .find(|(key, _)| found(*key))
        .map(|(_, name)| name.to_string())
}

fn first_sentence(text: &str, max: usize) -> String {
    let first = text.split('.').next().unwrap_or(text).trim();
    if first.chars().count() > max {
        let cut: String = first.chars().take(max - 3).collect();
        format!("{cut}...")
    } else {
        first.to_string()
    }
}

fn areas(text: &str, table: &[(&str, &[&str])]) -> Vec<String> {
    let lower = text.to_lowercase();
    let found: Vec<String> = table
        .iter()
        .filter(|(_, kws)| kws.iter().any(|kw| lower.contains(kw)))
        .map(|(area, _)| area.to_string())
        .collect();
    if found.is_empty() {
        vec!["general".to_string()]
    } else {
        found
    }
}

fn slug(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .take(6)
        .collect::<Vec<_>>()
        .join("_")
}

async fn read_optional(path: PathBuf) -> Result<Option<String>> {
    match tokio::fs::read_to_string(&path).await {
        Ok(s) => Ok(Some(s)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(BuilderError::io(path, err)),
    }
}

impl HeuristicAuthor {
    fn requirements(request: &str) -> Vec<Requirement> {
        let parts: Vec<Requirement> = REQUIREMENT_SPLIT
            .split(request)
            .map(str::trim)
            .filter(|part| part.len() > 10)
            .enumerate()
            .map(|(i, part)| Requirement {
                id: format!("R{}", i + 1),
                description: part.to_string(),
                acceptance_criteria: vec![
                    format!("{part} is implemented"),
                    format!("{part} is tested"),
                ],
            })
            .collect();
        if !parts.is_empty() {
            return parts;
        }
        vec![Requirement {
            id: "R1".into(),
            description: request.trim().to_string(),
            acceptance_criteria: vec![
                "Feature is implemented as described".into(),
                "Feature is tested and working".into(),
            ],
        }]
    }

    fn symptoms(description: &str) -> Vec<String> {
        let lower = description.to_lowercase();
        let mut found = Vec::new();
        for (re, label) in SYMPTOMS.iter() {
            for caps in re.captures_iter(&lower) {
                let m = caps[1].trim();
                if !m.is_empty() {
                    found.push(format!("{label}: {m}"));
                }
            }
        }
        if found.is_empty() {
            found = description
                .split('.')
                .take(3)
                .map(str::trim)
                .filter(|s| s.len() > 10)
                .map(str::to_string)
                .collect();
        }
        if found.is_empty() {
            found.push(description.chars().take(100).collect());
        }
        found
    }

    fn reproduction_steps(description: &str) -> Vec<String> {
        let numbered: Vec<String> = NUMBERED_STEP
            .captures_iter(description)
            .enumerate()
            .map(|(i, caps)| format!("Step {}: {}", i + 1, caps[1].trim()))
            .collect();
        if !numbered.is_empty() {
            return numbered;
        }
        let lower = description.to_lowercase();
        let steps: &[&str] = if lower.contains("login") || lower.contains("auth") {
            &[
                "Navigate to login page",
                "Enter credentials",
                "Submit login form",
                "Observe error/unexpected behavior",
            ]
        } else if lower.contains("click") || lower.contains("button") {
            &[
                "Navigate to the page with the affected element",
                "Click the button/element",
                "Observe error/unexpected behavior",
            ]
        } else {
            &[
                "Navigate to affected area",
                "Perform the action that triggers the bug",
                "Observe the unexpected behavior",
            ]
        };
        steps
            .iter()
            .enumerate()
            .map(|(i, s)| format!("Step {}: {s}", i + 1))
            .collect()
    }

    fn root_cause(description: &str, profile: &ProjectProfile) -> RootCause {
        let lower = description.to_lowercase();
        let (summary, code_path) = if lower.contains("timeout") || lower.contains("slow") {
            (
                "Performance issue, likely slow queries or network latency",
                "Request -> Handler -> Database Query",
            )
        } else if lower.contains("null") || lower.contains("undefined") {
            (
                "Null reference: data not initialised or validated",
                "Component -> Data Access -> null value",
            )
        } else if lower.contains("auth") || lower.contains("login") {
            (
                "Authentication flow issue in token or session handling",
                "Auth -> Token Manager -> Session Store",
            )
        } else {
            (
                "Logic error or unexpected state; requires investigation",
                "User Action -> Handler -> Business Logic",
            )
        };
        let mut affected_files = Vec::new();
        if profile.tech_stack.frontend.is_some() {
            affected_files.push("frontend components".to_string());
        }
        if profile.tech_stack.backend.is_some() {
            affected_files.push("backend handlers".to_string());
        }
        RootCause {
            summary: summary.to_string(),
            affected_files,
            code_path: code_path.to_string(),
        }
    }

    fn severity(symptoms: &[String], areas: &[String]) -> Severity {
        let text = symptoms.join(" ").to_lowercase();
        if ["data loss", "security", "crash", "delete"]
            .iter()
            .any(|kw| text.contains(kw))
        {
            Severity::Critical
        } else if areas.iter().any(|a| a == "authentication") || text.contains("auth") {
            Severity::High
        } else if areas.len() > 2 || text.contains("error") {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[async_trait]
impl Author for HeuristicAuthor {
    async fn profile(&self, project_dir: &Path) -> Result<ProjectProfile> {
        let mut profile = ProjectProfile::default();
        let stack = &mut profile.tech_stack;

        if let Some(raw) = read_optional(project_dir.join("package.json")).await? {
            let pkg: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|err| BuilderError::json(project_dir.join("package.json"), err))?;
            let has = |dep: &str| {
                ["dependencies", "devDependencies"]
                    .iter()
                    .any(|section| pkg.get(section).and_then(|d| d.get(dep)).is_some())
            };
            stack.language = Some(if has("typescript") { "TypeScript" } else { "JavaScript" }.into());
            stack.frontend = if has("next") {
                Some("Next.js".into())
            } else {
                lookup(FRONTEND, has)
            };
            stack.backend = lookup(BACKEND, has);
            stack.database = lookup(DATABASE, has);
            stack.auth = lookup(AUTH, has);
            profile.conventions.state_management = ["redux", "zustand", "jotai"]
                .into_iter()
                .find(|dep| raw.to_lowercase().contains(dep))
                .map(|dep| dep.to_string());
        }

        for file in ["requirements.txt", "pyproject.toml"] {
            if let Some(raw) = read_optional(project_dir.join(file)).await? {
                let lower = raw.to_lowercase();
                stack.language.get_or_insert_with(|| "Python".into());
                if let Some(found) = lookup(PYTHON_BACKENDS, |k| lower.contains(k)) {
                    stack.backend = Some(found);
                }
            }
        }

        if let Some(raw) = read_optional(project_dir.join("Cargo.toml")).await? {
            stack.language.get_or_insert_with(|| "Rust".into());
            if let Some(found) = lookup(RUST_BACKENDS, |k| raw.contains(k)) {
                stack.backend = Some(found);
            }
        }

        if tokio::fs::try_exists(project_dir.join("firebase.json"))
            .await
            .unwrap_or(false)
        {
            stack.database.get_or_insert_with(|| "Firestore".into());
            stack.auth.get_or_insert_with(|| "Firebase Auth".into());
        }

        let src = project_dir.join("src");
        let is_dir = |p: PathBuf| async move { tokio::fs::metadata(p).await.is_ok_and(|m| m.is_dir()) };
        profile.conventions.file_structure = if is_dir(src.join("features")).await {
            Some("feature-based".into())
        } else if is_dir(src.join("components")).await && is_dir(src.join("services")).await {
            Some("layer-based".into())
        } else if is_dir(src.clone()).await {
            Some("flat".into())
        } else {
            None
        };

        Ok(profile)
    }

    async fn draft_requirements(
        &self,
        request: &Request,
        kind: RequestKind,
        profile: &ProjectProfile,
    ) -> Result<RequirementsDocument> {
        let text = request.description.trim();
        let title = first_sentence(text, 50);
        let requirements = Self::requirements(text);
        let mut affected_areas = areas(text, FEATURE_AREAS);
        if profile.tech_stack.frontend.is_some() {
            affected_areas.push("frontend".into());
        }
        if profile.tech_stack.backend.is_some() {
            affected_areas.push("backend".into());
        }
        let summary = if text.chars().count() > 200 {
            format!("{}...", text.chars().take(200).collect::<String>())
        } else {
            text.to_string()
        };
        Ok(RequirementsDocument {
            estimated_feature_count: requirements.len().max(1),
            validation_plan: ValidationPlan {
                unit_tests: vec![format!("test_{}", slug(&title))],
                integration_tests: Vec::new(),
                manual_verification: vec!["UI walkthrough".into(), "Edge case testing".into()],
            },
            title,
            kind,
            summary,
            requirements,
            affected_areas,
            bug_reference: None,
            created_at: Utc::now(),
        })
    }

    async fn triage_bug(&self, request: &Request, profile: &ProjectProfile) -> Result<BugReport> {
        let text = request.description.trim();
        let symptoms = Self::symptoms(text);
        let affected_areas = areas(text, BUG_AREAS);
        let now = Utc::now();
        Ok(BugReport {
            id: format!("BUG-{}", now.format("%Y%m%d%H%M%S")),
            title: first_sentence(text, 60),
            severity: Self::severity(&symptoms, &affected_areas),
            reproduction_steps: Self::reproduction_steps(text),
            root_cause: Self::root_cause(text, profile),
            symptoms,
            affected_areas,
            created_at: now,
        })
    }

    async fn fix_requirements(
        &self,
        bug: &BugReport,
        _profile: &ProjectProfile,
    ) -> Result<RequirementsDocument> {
        Ok(RequirementsDocument {
            title: format!("Fix: {}", bug.title),
            kind: RequestKind::Bug,
            summary: bug.root_cause.summary.clone(),
            requirements: vec![Requirement {
                id: "R1".into(),
                description: format!("Fix {}", bug.title),
                acceptance_criteria: vec![
                    "Bug no longer reproducible".into(),
                    "Regression test added".into(),
                    "All existing tests pass".into(),
                ],
            }],
            affected_areas: bug.affected_areas.clone(),
            validation_plan: ValidationPlan {
                unit_tests: vec![format!("test_fix_{}", bug.id.to_lowercase())],
                integration_tests: Vec::new(),
                manual_verification: bug.reproduction_steps.clone(),
            },
            estimated_feature_count: 1,
            bug_reference: Some(bug.id.clone()),
            created_at: Utc::now(),
        })
    }
}

/// Delegates authoring to an external program.
///
/// The program runs under `/bin/sh -c`, receives one JSON object on stdin
/// (`{"operation": ..., ...}`) and must print the resulting artifact as JSON
/// on stdout. The credential is passed in the environment variable named by
/// `credential_env`.
pub struct CommandAuthor {
    command: String,
    credential_env: String,
    credential: String,
    timeout: Duration,
}

impl CommandAuthor {
    pub fn new(
        command: impl Into<String>,
        credential_env: impl Into<String>,
        credential: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            credential_env: credential_env.into(),
            credential: credential.into(),
            timeout,
        }
    }

    async fn call<T: DeserializeOwned>(&self, input: serde_json::Value) -> Result<T> {
        let operation = input["operation"].as_str().unwrap_or("unknown").to_string();
        let payload = serde_json::to_vec(&input)
            .map_err(|err| BuilderError::Author(format!("encoding {operation} input: {err}")))?;

        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(&self.command)
            .env(&self.credential_env, &self.credential)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| BuilderError::Author(format!("spawning `{}`: {err}", self.command)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|err| BuilderError::Author(format!("writing {operation} input: {err}")))?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                BuilderError::Author(format!(
                    "{operation} timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|err| BuilderError::Author(format!("waiting for {operation}: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuilderError::Author(format!(
                "{operation} exited with {}: {}",
                output.status,
                stderr.trim().chars().take(300).collect::<String>()
            )));
        }
        tracing::debug!(operation = %operation, bytes = output.stdout.len(), "Author responded");
        serde_json::from_slice(&output.stdout)
            .map_err(|err| BuilderError::Author(format!("{operation} returned malformed JSON: {err}")))
    }
}

fn input(operation: &str, fields: impl Serialize) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(fields)
        .map_err(|err| BuilderError::Author(format!("encoding {operation} input: {err}")))?;
    if let Some(map) = value.as_object_mut() {
        map.insert("operation".into(), operation.into());
    }
    Ok(value)
}

#[async_trait]
impl Author for CommandAuthor {
    async fn profile(&self, project_dir: &Path) -> Result<ProjectProfile> {
        self.call(input("profile", serde_json::json!({ "project_dir": project_dir }))?)
            .await
    }

    async fn draft_requirements(
        &self,
        request: &Request,
        kind: RequestKind,
        profile: &ProjectProfile,
    ) -> Result<RequirementsDocument> {
        self.call(input(
            "draft_requirements",
            serde_json::json!({ "request": request, "kind": kind, "profile": profile }),
        )?)
        .await
    }

    async fn triage_bug(&self, request: &Request, profile: &ProjectProfile) -> Result<BugReport> {
        self.call(input(
            "triage_bug",
            serde_json::json!({ "request": request, "profile": profile }),
        )?)
        .await
    }

    async fn fix_requirements(
        &self,
        bug: &BugReport,
        profile: &ProjectProfile,
    ) -> Result<RequirementsDocument> {
        self.call(input(
            "fix_requirements",
            serde_json::json!({ "bug": bug, "profile": profile }),
        )?)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn profile_reads_package_json() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"next": "14", "react": "18", "prisma": "5", "zustand": "4"},
                "devDependencies": {"typescript": "5"}}"#,
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("src/features")).unwrap();

        let profile = HeuristicAuthor.profile(dir.path()).await.unwrap();
        assert_eq!(profile.tech_stack.frontend.as_deref(), Some("Next.js"));
        assert_eq!(profile.tech_stack.database.as_deref(), Some("Prisma"));
        assert_eq!(profile.tech_stack.language.as_deref(), Some("TypeScript"));
        assert_eq!(profile.conventions.state_management.as_deref(), Some("zustand"));
        assert_eq!(profile.conventions.file_structure.as_deref(), Some("feature-based"));
    }

    #[tokio::test]
    async fn draft_splits_on_conjunctions() {
        let req = Request::new(
            "Add a settings page with a theme picker and an email preferences form",
            DeclaredType::Small,
        );
        let doc = HeuristicAuthor
            .draft_requirements(&req, RequestKind::Small, &ProjectProfile::default())
            .await
            .unwrap();
        let ids: Vec<_> = doc.requirements.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["R1", "R2", "R3"]);
        assert_eq!(doc.estimated_feature_count, 3);
        assert!(doc.validate().is_ok());
    }

    #[tokio::test]
    async fn triage_builds_fix_with_regression_step() {
        let req = Request::new(
            "Login crashes: session token missing after refresh. 1. Log in. 2. Refresh the page.",
            DeclaredType::Bug,
        );
        let profile = ProjectProfile::default();
        let bug = HeuristicAuthor.triage_bug(&req, &profile).await.unwrap();
        assert_eq!(bug.severity, Severity::Critical);
        assert_eq!(bug.reproduction_steps.len(), 2);
        assert!(bug.affected_areas.contains(&"authentication".to_string()));

        let fix = HeuristicAuthor.fix_requirements(&bug, &profile).await.unwrap();
        assert!(fix.has_regression_step());
        assert_eq!(fix.bug_reference.as_deref(), Some(bug.id.as_str()));
    }

    #[tokio::test]
    async fn command_author_round_trips_json() {
        let author = CommandAuthor::new(
            r#"test "$AUTHOR_KEY" = secret && cat >/dev/null && echo '{"tech_stack":{"language":"Go"}}'"#,
            "AUTHOR_KEY",
            "secret",
            Duration::from_secs(10),
        );
        let profile = author.profile(Path::new(".")).await.unwrap();
        assert_eq!(profile.tech_stack.language.as_deref(), Some("Go"));

        let failing = CommandAuthor::new("exit 2", "AUTHOR_KEY", "secret", Duration::from_secs(10));
        assert!(matches!(
            failing.profile(Path::new(".")).await,
            Err(BuilderError::Author(_))
        ));
    }
}
