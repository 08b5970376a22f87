//! CLI command definitions and handlers

pub mod config;
pub mod features;
pub mod learn;
pub mod request;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::{Config, ProjectPaths};
use crate::error::BuilderError;
use crate::feature::FeatureRegistry;
use crate::store::FileStore;

/// featureloop - session-bounded feature tracking for autonomous implementers
///
/// Structured results are printed to stdout as JSON. Errors go to stderr as
/// `error[<kind>]` with a remediation hint and a non-zero exit code.
#[derive(Parser, Debug)]
#[command(name = "featureloop")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Project directory to operate on
    #[arg(long, short = 'C', global = true, env = "FEATURELOOP_PROJECT", default_value = ".")]
    pub project: PathBuf,

    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print feature counts
    Status,

    /// List every feature with its status
    List,

    /// Print the next pending feature, or null
    GetNext,

    /// Mark a pending feature in progress
    Start(IndexArgs),

    /// Mark an in-progress feature passing
    MarkComplete(IndexArgs),

    /// Skip an in-progress feature because of an external blocker
    MarkSkip(SkipArgs),

    /// Return an in-progress feature to pending
    Clear(IndexArgs),

    /// Sample passing features for re-verification
    Regression(RegressionArgs),

    /// Create features from a JSON file (a list of features)
    CreateBulk(CreateBulkArgs),

    /// Run the validation loop on an in-progress feature
    Validate(ValidateArgs),

    /// Route a request through the generation pipeline
    Request(RequestArgs),

    /// Approve the draft awaiting approval and create its features
    Approve(ApprovalArgs),

    /// Discard the draft awaiting approval
    Reject(ApprovalArgs),

    /// Record a pattern, gotcha or common error
    Learn(LearnArgs),

    /// Print the knowledge base
    Learnings(LearningsArgs),

    /// Append to or print the session log
    Log(LogArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct IndexArgs {
    /// Feature index
    pub index: u64,
}

#[derive(Parser, Debug)]
pub struct SkipArgs {
    /// Feature index
    pub index: u64,

    /// Why the feature cannot be completed
    pub reason: String,
}

#[derive(Parser, Debug)]
pub struct RegressionArgs {
    /// How many passing features to sample (default: registry.regression_limit)
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,
}

#[derive(Parser, Debug)]
pub struct CreateBulkArgs {
    /// JSON file with an array of features; `-` reads stdin
    pub file: PathBuf,
}

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Feature index
    pub index: u64,

    /// Shell command run once per step (step text in $FEATURELOOP_STEP)
    #[arg(long)]
    pub exec: String,

    /// Shell command run after a failed attempt
    #[arg(long)]
    pub fix: Option<String>,

    /// Override ralph.max_attempts
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

#[derive(Parser, Debug)]
pub struct RequestArgs {
    /// What to build or fix
    pub description: String,

    /// Skip classification: big, small or bug
    #[arg(long = "type", short = 't')]
    pub declared_type: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ApprovalArgs {
    /// Only act if the pending draft has this id
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LearnKind {
    Pattern,
    Gotcha,
    Error,
}

#[derive(Parser, Debug)]
pub struct LearnArgs {
    #[arg(value_enum)]
    pub kind: LearnKind,

    /// The pattern, warning or error text
    pub text: String,

    /// Context, reason or fix
    #[arg(default_value = "")]
    pub rationale: String,
}

#[derive(Parser, Debug)]
pub struct LearningsArgs {
    /// Only this kind
    #[arg(long, value_enum)]
    pub kind: Option<LearnKind>,
}

#[derive(Parser, Debug)]
pub struct LogArgs {
    /// Message to append; omit to print the log
    pub message: Option<String>,

    /// Session number (default: the current session)
    #[arg(long, conflicts_with = "new_session")]
    pub session: Option<u32>,

    /// Start a new session with this entry
    #[arg(long)]
    pub new_session: bool,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Show current configuration
    #[arg(long)]
    pub show: bool,

    /// Initialize default project configuration
    #[arg(long)]
    pub init: bool,

    /// Set a configuration value (key=value)
    #[arg(long)]
    pub set: Option<String>,
}

/// Loaded configuration plus the project layout
#[derive(Clone)]
pub struct Workspace {
    pub paths: ProjectPaths,
    pub config: Config,
}

impl Workspace {
    pub async fn load(project: &Path) -> crate::error::Result<Self> {
        Ok(Self {
            paths: ProjectPaths::new(project),
            config: Config::load(project).await?,
        })
    }

    pub fn registry(&self) -> FeatureRegistry<FileStore> {
        FeatureRegistry::new(FileStore::for_project(
            &self.paths,
            self.config.store.lock_timeout(),
        ))
        .with_retries(self.config.store.retries)
        .with_complexity_threshold(self.config.registry.complexity_threshold)
    }
}

/// Dispatch a parsed command
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    // Config commands must work even when the current config does not load
    let command = match cli.command {
        Command::Config(args) => return config::execute(&cli.project, args).await,
        command => command,
    };
    let ws = Workspace::load(&cli.project).await?;
    match command {
        Command::Status => off_runtime(&ws, features::status).await,
        Command::List => off_runtime(&ws, features::list).await,
        Command::GetNext => off_runtime(&ws, features::get_next).await,
        Command::Start(args) => off_runtime(&ws, move |ws| features::start(ws, args)).await,
        Command::MarkComplete(args) => {
            off_runtime(&ws, move |ws| features::mark_complete(ws, args)).await
        }
        Command::MarkSkip(args) => off_runtime(&ws, move |ws| features::mark_skip(ws, args)).await,
        Command::Clear(args) => off_runtime(&ws, move |ws| features::clear(ws, args)).await,
        Command::Regression(args) => {
            off_runtime(&ws, move |ws| features::regression(ws, args)).await
        }
        Command::CreateBulk(args) => features::create_bulk(&ws, args).await,
        Command::Validate(args) => features::validate(&ws, args).await,
        Command::Request(args) => request::submit(&ws, args).await,
        Command::Approve(args) => request::approve(&ws, args).await,
        Command::Reject(args) => request::reject(&ws, args).await,
        Command::Learn(args) => off_runtime(&ws, move |ws| learn::learn(ws, args)).await,
        Command::Learnings(args) => off_runtime(&ws, move |ws| learn::learnings(ws, args)).await,
        Command::Log(args) => off_runtime(&ws, move |ws| learn::log(ws, args)).await,
        Command::Config(args) => config::execute(ws.paths.root(), args).await,
    }
}

/// Run a handler that waits on project file locks on the blocking pool
async fn off_runtime<F>(ws: &Workspace, handler: F) -> anyhow::Result<()>
where
    F: FnOnce(&Workspace) -> anyhow::Result<()> + Send + 'static,
{
    let ws = ws.clone();
    match tokio::task::spawn_blocking(move || handler(&ws)).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(BuilderError::Task(err.to_string()).into()),
    }
}

/// Print a value as pretty JSON on stdout
pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
