//! Configuration system
//!
//! Handles loading configuration from multiple sources, lowest precedence first:
//! - Built-in defaults
//! - Global config (~/.config/featureloop/config.toml)
//! - Project config (<project>/featureloop.toml or <project>/.featureloop/config.toml)
//! - Environment variables (FEATURELOOP_*)
//!
//! The authoring credential is read from the environment at load time and is
//! never written back to disk.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::error::{BuilderError, Result};
use crate::ralph::RalphConfig;

/// Main configuration structure
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Validation loop settings
    #[serde(default)]
    pub ralph: RalphConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub author: AuthorConfig,

    /// Value of the credential variable named by `author.credential_env`
    #[serde(skip)]
    pub credential: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("ralph", &self.ralph)
            .field("registry", &self.registry)
            .field("store", &self.store)
            .field("router", &self.router)
            .field("author", &self.author)
            .field("credential", &self.credential.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Default number of passing features handed out for regression checks
    #[serde(default = "default_regression_limit")]
    pub regression_limit: usize,

    /// Complexity score above which a feature gets a split suggestion
    #[serde(default = "default_complexity_threshold")]
    pub complexity_threshold: u8,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            regression_limit: default_regression_limit(),
            complexity_threshold: default_complexity_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long to wait for the state lock before failing
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Automatic reload-and-retry attempts on contention
    #[serde(default = "default_store_retries")]
    pub retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            retries: default_store_retries(),
        }
    }
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Estimated feature count above which a request is "big"
    #[serde(default = "default_big_threshold")]
    pub big_threshold: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            big_threshold: default_big_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorConfig {
    #[serde(default)]
    pub mode: AuthorMode,

    /// External program used when `mode = "command"`
    #[serde(default)]
    pub command: Option<String>,

    /// Environment variable holding the collaborator's credential
    #[serde(default = "default_credential_env")]
    pub credential_env: String,
}

impl Default for AuthorConfig {
    fn default() -> Self {
        Self {
            mode: AuthorMode::default(),
            command: None,
            credential_env: default_credential_env(),
        }
    }
}

/// Which authoring collaborator produces requirements documents
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthorMode {
    /// Built-in deterministic heuristics
    #[default]
    Heuristic,
    /// External program speaking JSON on stdin/stdout
    Command,
}

fn default_regression_limit() -> usize {
    3
}
fn default_complexity_threshold() -> u8 {
    crate::feature::sizing::DEFAULT_COMPLEXITY_THRESHOLD
}
fn default_lock_timeout_ms() -> u64 {
    5_000
}
fn default_store_retries() -> u32 {
    3
}
fn default_big_threshold() -> usize {
    5
}
fn default_credential_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

impl Config {
    /// Load configuration from all sources for a project directory
    pub async fn load(project_dir: &Path) -> Result<Self> {
        Self::load_from(
            Self::global_config_path().as_deref(),
            project_dir,
            |key| std::env::var(key).ok(),
        )
        .await
    }

    /// Load with an explicit global file and environment lookup.
    ///
    /// Layers, lowest first: `global`, `featureloop.toml`,
    /// `.featureloop/config.toml`, then `env`.
    pub async fn load_from(
        global: Option<&Path>,
        project_dir: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut merged = toml::Table::new();

        if let Some(global_path) = global {
            merge_tables(&mut merged, read_table(global_path).await?);
        }
        let paths = ProjectPaths::new(project_dir);
        for path in [paths.config_file(), paths.config_dir_file()] {
            merge_tables(&mut merged, read_table(&path).await?);
        }

        let mut config: Config = toml::Value::Table(merged)
            .try_into()
            .map_err(|err: toml::de::Error| BuilderError::Config(err.to_string()))?;
        config.apply_env(env)?;
        config.validate()?;
        tracing::debug!(?config, "Loaded configuration");
        Ok(config)
    }

    /// Get the global config file path
    pub fn global_config_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "featureloop", "featureloop")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Write the defaults to the project config, keeping an existing file
    pub async fn init_default(project_dir: &Path) -> Result<PathBuf> {
        let path = ProjectPaths::new(project_dir).config_dir_file();
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| BuilderError::io(parent, err))?;
        }
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|err| BuilderError::Config(err.to_string()))?;
        fs::write(&path, content)
            .await
            .map_err(|err| BuilderError::io(&path, err))?;
        tracing::info!(path = %path.display(), "Created project config");
        Ok(path)
    }

    /// Set one dotted key in the project config file
    pub async fn set(project_dir: &Path, key: &str, value: &str) -> Result<()> {
        let path = ProjectPaths::new(project_dir).config_dir_file();
        let mut table = read_table(&path).await?;
        set_dotted(&mut table, key, parse_scalar(value))?;

        // Reject keys or values the schema would not accept
        let candidate: Config = toml::Value::Table(table.clone())
            .try_into()
            .map_err(|err: toml::de::Error| {
                BuilderError::Config(format!("invalid value for {key}: {err}"))
            })?;
        candidate.validate()?;
        if !known_key(key) {
            return Err(BuilderError::Config(format!("unknown config key: {key}")));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| BuilderError::io(parent, err))?;
        }
        let content =
            toml::to_string_pretty(&table).map_err(|err| BuilderError::Config(err.to_string()))?;
        fs::write(&path, content)
            .await
            .map_err(|err| BuilderError::io(&path, err))?;
        Ok(())
    }

    /// Apply environment variable overrides and read the credential
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(val) = lookup("FEATURELOOP_MAX_ATTEMPTS") {
            self.ralph.max_attempts = parse_env("FEATURELOOP_MAX_ATTEMPTS", &val)?;
        }
        if let Some(val) = lookup("FEATURELOOP_LOCK_TIMEOUT_MS") {
            self.store.lock_timeout_ms = parse_env("FEATURELOOP_LOCK_TIMEOUT_MS", &val)?;
        }
        if let Some(val) = lookup("FEATURELOOP_BIG_THRESHOLD") {
            self.router.big_threshold = parse_env("FEATURELOOP_BIG_THRESHOLD", &val)?;
        }
        if let Some(val) = lookup("FEATURELOOP_AUTHOR_MODE") {
            self.author.mode = match val.trim().to_ascii_lowercase().as_str() {
                "heuristic" => AuthorMode::Heuristic,
                "command" => AuthorMode::Command,
                other => {
                    return Err(BuilderError::Config(format!(
                        "FEATURELOOP_AUTHOR_MODE must be heuristic or command, got {other}"
                    )));
                }
            };
        }
        if let Some(val) = lookup("FEATURELOOP_AUTHOR_COMMAND") {
            self.author.command = Some(val);
        }
        self.credential = lookup(&self.author.credential_env).filter(|v| !v.trim().is_empty());
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.ralph.max_attempts == 0 {
            return Err(BuilderError::Config("ralph.max_attempts must be at least 1".into()));
        }
        if self.store.lock_timeout_ms == 0 {
            return Err(BuilderError::Config("store.lock_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// The authoring collaborator cannot run without its credential
    pub fn require_credential(&self) -> Result<&str> {
        self.credential.as_deref().ok_or_else(|| {
            BuilderError::Config(format!(
                "{} environment variable not set; the authoring collaborator needs it",
                self.author.credential_env
            ))
        })
    }
}

/// Standard file layout inside a project directory
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Working directory for locks and pipeline artifacts
    pub fn work_dir(&self) -> PathBuf {
        self.root.join(".featureloop")
    }

    pub fn features(&self) -> PathBuf {
        self.root.join("feature_list.json")
    }

    pub fn features_lock(&self) -> PathBuf {
        self.work_dir().join("feature_list.lock")
    }

    pub fn knowledge(&self) -> PathBuf {
        self.root.join("knowledge.json")
    }

    pub fn knowledge_lock(&self) -> PathBuf {
        self.work_dir().join("knowledge.lock")
    }

    pub fn session_log(&self) -> PathBuf {
        self.root.join("session-log.txt")
    }

    pub fn session_log_lock(&self) -> PathBuf {
        self.work_dir().join("session-log.lock")
    }

    pub fn artifact(&self, name: &str) -> PathBuf {
        self.work_dir().join(name)
    }

    pub fn pipeline_lock(&self) -> PathBuf {
        self.work_dir().join("pipeline.lock")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("featureloop.toml")
    }

    pub fn config_dir_file(&self) -> PathBuf {
        self.work_dir().join("config.toml")
    }
}

async fn read_table(path: &Path) -> Result<toml::Table> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(toml::Table::new()),
        Err(err) => return Err(BuilderError::io(path, err)),
    };
    toml::from_str(&content).map_err(|source| BuilderError::Toml {
        path: path.to_path_buf(),
        source,
    })
}

/// Deep-merge `other` into `base`; `other` wins on conflicts
fn merge_tables(base: &mut toml::Table, other: toml::Table) {
    for (key, value) in other {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn set_dotted(table: &mut toml::Table, key: &str, value: toml::Value) -> Result<()> {
    let mut parts: Vec<&str> = key.split('.').collect();
    let Some(last) = parts.pop() else {
        return Err(BuilderError::Config("empty config key".into()));
    };
    let mut current = table;
    for part in parts {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        current = match entry {
            toml::Value::Table(t) => t,
            _ => return Err(BuilderError::Config(format!("{part} is not a section"))),
        };
    }
    current.insert(last.to_string(), value);
    Ok(())
}

fn parse_scalar(value: &str) -> toml::Value {
    let trimmed = value.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" => toml::Value::Boolean(true),
        "false" | "no" | "off" => toml::Value::Boolean(false),
        _ => toml::Value::String(trimmed.to_string()),
    }
}

fn known_key(key: &str) -> bool {
    matches!(
        key,
        "ralph.max_attempts"
            | "registry.regression_limit"
            | "registry.complexity_threshold"
            | "store.lock_timeout_ms"
            | "store.retries"
            | "router.big_threshold"
            | "author.mode"
            | "author.command"
            | "author.credential_env"
    )
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BuilderError::Config(format!("{name} has invalid value {value:?}")))
}
