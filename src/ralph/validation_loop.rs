//! Ralph loop - bounded attempt / diagnose / fix cycle gating acceptance

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::types::*;
use crate::error::{BuilderError, Result};
use crate::feature::{Feature, FeatureRegistry, FeatureStatus};
use crate::store::ProjectStore;

/// Executes a single verification step
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step(&self, feature: &Feature, step_number: usize, step: &str)
    -> Result<StepResult>;
}

/// Attempts to repair a failing step; returns a summary of what was tried
#[async_trait]
pub trait Fixer: Send + Sync {
    async fn fix(&self, feature: &Feature, failure: &StepFailure, attempt: u32)
    -> Result<Option<String>>;
}

/// Fixer for runs where a person repairs things between attempts
pub struct NoFix;

#[async_trait]
impl Fixer for NoFix {
    async fn fix(&self, _: &Feature, _: &StepFailure, _: u32) -> Result<Option<String>> {
        Ok(None)
    }
}

/// The validation loop executor
pub struct ValidationLoop<R, F> {
    config: RalphConfig,
    runner: R,
    fixer: F,
    event_tx: Option<mpsc::Sender<LoopEvent>>,
}

impl<R: StepRunner, F: Fixer> ValidationLoop<R, F> {
    pub fn new(config: RalphConfig, runner: R, fixer: F) -> Self {
        Self {
            config,
            runner,
            fixer,
            event_tx: None,
        }
    }

    /// Set an event channel for phase notifications
    pub fn with_event_tx(mut self, tx: mpsc::Sender<LoopEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn try_send_event(&self, feature_index: u64, attempt: u32, phase: LoopPhase) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.try_send(LoopEvent {
                feature_index,
                attempt,
                phase,
            });
        }
    }

    /// Run the loop against a feature without touching persisted state
    pub async fn run(&self, feature: &Feature) -> Result<ValidationOutcome> {
        self.run_inner(feature, &Discard).await
    }

    /// Validate an in-progress feature and record the outcome in the registry.
    ///
    /// Every failed attempt is recorded as it happens. `Validated` marks the
    /// feature passing; `Blocked` stores the diagnostic and leaves it in progress.
    /// A feature that is already blocked must be cleared before it can run again.
    pub async fn gate<S: ProjectStore + Clone + 'static>(
        &self,
        registry: &FeatureRegistry<S>,
        index: u64,
    ) -> Result<ValidationOutcome> {
        let feature = registry.blocking(move |r| r.get(index)).await?;
        if feature.status != FeatureStatus::InProgress {
            return Err(BuilderError::InvalidTransition {
                index,
                from: feature.status,
                action: "validate",
            });
        }
        if feature.blocked.is_some() {
            return Err(BuilderError::InvalidTransition {
                index,
                from: feature.status,
                action: "validate before its block is cleared",
            });
        }

        let outcome = self
            .run_inner(&feature, &RecordTo { registry, index })
            .await?;

        match &outcome {
            ValidationOutcome::Validated { .. } => {
                registry.blocking(move |r| r.mark_passing(index)).await?;
            }
            ValidationOutcome::Blocked(report) => {
                let report = report.clone();
                registry
                    .blocking(move |r| r.record_blocked(index, &report))
                    .await?;
            }
        }
        Ok(outcome)
    }

    async fn run_inner(
        &self,
        feature: &Feature,
        on_failure: &dyn FailureSink,
    ) -> Result<ValidationOutcome> {
        let index = feature.index;
        let max_attempts = self.config.max_attempts.max(1);
        let mut history: Vec<AttemptRecord> = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.try_send_event(index, attempt, LoopPhase::Attempting);
            debug!(index, attempt, max_attempts, "Validation attempt");

            let Some(failure) = self.attempt(feature).await? else {
                self.try_send_event(index, attempt, LoopPhase::Validated);
                info!(index, attempt, "Feature validated");
                return Ok(ValidationOutcome::Validated {
                    feature_index: index,
                    attempts: attempt,
                });
            };

            self.try_send_event(index, attempt, LoopPhase::Diagnosing);
            warn!(
                index,
                attempt,
                step = failure.step_number,
                observed = %failure.observed.chars().take(300).collect::<String>(),
                "Verification step failed"
            );
            on_failure.record(&failure).await?;

            if attempt >= max_attempts {
                history.push(AttemptRecord {
                    attempt,
                    failure,
                    fix_summary: None,
                });
                self.try_send_event(index, attempt, LoopPhase::Blocked);
                warn!(index, attempts = attempt, "Feature blocked");
                let report = BlockedReport::new(index, history)
                    .ok_or_else(|| BuilderError::validation(Some(index), "no attempts recorded"))?;
                return Ok(ValidationOutcome::Blocked(report));
            }

            self.try_send_event(index, attempt, LoopPhase::Fixing);
            let fix_summary = self.fixer.fix(feature, &failure, attempt).await?;
            history.push(AttemptRecord {
                attempt,
                failure,
                fix_summary,
            });
        }
    }

    /// Run steps in order; the first failure ends the attempt
    async fn attempt(&self, feature: &Feature) -> Result<Option<StepFailure>> {
        for (i, step) in feature.steps.iter().enumerate() {
            let step_number = i + 1;
            match self.runner.run_step(feature, step_number, step).await? {
                StepResult::Passed => {
                    debug!(index = feature.index, step_number, "Step passed");
                }
                StepResult::Failed { expected, observed } => {
                    return Ok(Some(StepFailure {
                        step_number,
                        step: step.clone(),
                        expected,
                        observed,
                    }));
                }
            }
        }
        Ok(None)
    }
}

/// Where failed attempts go while the loop runs
#[async_trait]
trait FailureSink: Send + Sync {
    async fn record(&self, failure: &StepFailure) -> Result<()>;
}

struct Discard;

#[async_trait]
impl FailureSink for Discard {
    async fn record(&self, _: &StepFailure) -> Result<()> {
        Ok(())
    }
}

struct RecordTo<'a, S: ProjectStore> {
    registry: &'a FeatureRegistry<S>,
    index: u64,
}

#[async_trait]
impl<S: ProjectStore + Clone + 'static> FailureSink for RecordTo<'_, S> {
    async fn record(&self, failure: &StepFailure) -> Result<()> {
        let index = self.index;
        let message = format!(
            "step {} ({}): expected {}, observed {}",
            failure.step_number, failure.step, failure.expected, failure.observed
        );
        self.registry
            .blocking(move |r| r.record_attempt_failure(index, &message))
            .await
            .map(|_| ())
    }
}

/// Runs each step through `/bin/sh -c <command>`.
///
/// The step is exposed to the command as `FEATURELOOP_STEP`, with
/// `FEATURELOOP_FEATURE_INDEX` and `FEATURELOOP_STEP_NUMBER` alongside.
/// Exit status 0 means the step passed.
pub struct CommandStepRunner {
    command: String,
    working_dir: PathBuf,
    timeout: Duration,
}

impl CommandStepRunner {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.into(),
            timeout,
        }
    }
}

#[async_trait]
impl StepRunner for CommandStepRunner {
    async fn run_step(
        &self,
        feature: &Feature,
        step_number: usize,
        step: &str,
    ) -> Result<StepResult> {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .env("FEATURELOOP_FEATURE_INDEX", feature.index.to_string())
            .env("FEATURELOOP_STEP_NUMBER", step_number.to_string())
            .env("FEATURELOOP_STEP", step);

        Ok(match run_shell(cmd, self.timeout, &self.working_dir).await? {
            ShellRun::Finished {
                success: true, ..
            } => StepResult::Passed,
            ShellRun::Finished { code, output, .. } => StepResult::Failed {
                expected: "exit status 0".to_string(),
                observed: format!("exit status {}: {}", code_label(code), error_summary(&output)),
            },
            ShellRun::TimedOut => StepResult::Failed {
                expected: format!("completion within {}s", self.timeout.as_secs()),
                observed: "timed out".to_string(),
            },
        })
    }
}

/// Runs a repair command through `/bin/sh -c <command>` after a failed attempt.
///
/// The failure is exposed as `FEATURELOOP_FAILING_STEP`, `FEATURELOOP_EXPECTED`,
/// `FEATURELOOP_OBSERVED` and `FEATURELOOP_ATTEMPT`. Its trimmed stdout becomes
/// the attempt's fix summary.
pub struct CommandFixer {
    command: String,
    working_dir: PathBuf,
    timeout: Duration,
}

impl CommandFixer {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Fixer for CommandFixer {
    async fn fix(
        &self,
        feature: &Feature,
        failure: &StepFailure,
        attempt: u32,
    ) -> Result<Option<String>> {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .env("FEATURELOOP_FEATURE_INDEX", feature.index.to_string())
            .env("FEATURELOOP_FAILING_STEP", &failure.step)
            .env("FEATURELOOP_EXPECTED", &failure.expected)
            .env("FEATURELOOP_OBSERVED", &failure.observed)
            .env("FEATURELOOP_ATTEMPT", attempt.to_string());

        Ok(Some(match run_shell(cmd, self.timeout, &self.working_dir).await? {
            ShellRun::Finished {
                success: true,
                output,
                ..
            } => {
                let summary = output.stdout.trim();
                if summary.is_empty() {
                    "fix command completed".to_string()
                } else {
                    summary.chars().take(500).collect()
                }
            }
            ShellRun::Finished { code, output, .. } => {
                warn!(index = feature.index, attempt, "Fix command failed");
                format!(
                    "fix command exited with {}: {}",
                    code_label(code),
                    error_summary(&output)
                )
            }
            ShellRun::TimedOut => {
                warn!(index = feature.index, attempt, "Fix command timed out");
                format!("fix command timed out after {}s", self.timeout.as_secs())
            }
        }))
    }
}

struct CapturedOutput {
    stdout: String,
    stderr: String,
}

enum ShellRun {
    Finished {
        success: bool,
        code: Option<i32>,
        output: CapturedOutput,
    },
    TimedOut,
}

async fn run_shell(mut cmd: Command, timeout: Duration, dir: &Path) -> Result<ShellRun> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let child = cmd.spawn().map_err(|err| BuilderError::io(dir, err))?;
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output.map_err(|err| BuilderError::io(dir, err))?;
            Ok(ShellRun::Finished {
                success: output.status.success(),
                code: output.status.code(),
                output: CapturedOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                },
            })
        }
        Err(_) => Ok(ShellRun::TimedOut),
    }
}

fn code_label(code: Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

/// Error-looking lines first, otherwise the tail of the output
fn error_summary(output: &CapturedOutput) -> String {
    let combined = format!("{}\n{}", output.stdout, output.stderr);
    let errors: Vec<&str> = combined
        .lines()
        .filter(|line| line.starts_with("error") || line.contains("error:") || line.contains("error["))
        .take(5)
        .collect();
    let lines = if errors.is_empty() {
        let all: Vec<&str> = combined.lines().filter(|l| !l.trim().is_empty()).collect();
        all[all.len().saturating_sub(3)..].to_vec()
    } else {
        errors
    };
    lines.join(" | ").chars().take(300).collect()
}
