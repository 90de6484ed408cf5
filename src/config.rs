//! Configuration management for fetchqueue using the prefer crate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{EnqueueOptions, ExecutionMode};
use crate::repository::pool::DieselError;
use crate::repository::util::{is_postgres_url, redact_url_password, validate_database_url};
use crate::repository::DbContext;
use crate::work_queue::{HandlerKind, HandlerRegistry, WorkQueueError};

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "fetchqueue.db";

/// Name prefer uses to discover config files (`fetchqueue.toml`, ...).
const CONFIG_NAME: &str = "fetchqueue";

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    /// Supports sqlite: and postgres:// URLs.
    pub database_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        // Local data dir -> Home dir -> Current dir
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fetchqueue");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            format!("sqlite:{}", self.database_path().display())
        }
    }

    /// Database URL with any password masked, for display.
    pub fn display_database_url(&self) -> String {
        redact_url_password(&self.database_url())
    }

    /// Check if using PostgreSQL (vs SQLite).
    pub fn is_postgres(&self) -> bool {
        self.database_url
            .as_ref()
            .is_some_and(|url| is_postgres_url(url))
    }

    /// Get the full path to the database (for SQLite file-based databases).
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Ensure the data directory exists (SQLite only).
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        if self.database_url.is_none() {
            std::fs::create_dir_all(&self.data_dir)?;
        }
        Ok(())
    }

    /// Create a database context for the configured backend.
    pub fn create_db_context(&self) -> Result<DbContext, DieselError> {
        DbContext::from_url(&self.database_url())
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_batch_size() -> u32 {
    10
}

fn default_lease_secs() -> u64 {
    300
}

fn default_concurrency() -> usize {
    1
}

/// Static configuration for one job type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Where runs of this job type execute.
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Built-in handler that processes each payload.
    #[serde(default)]
    pub handler: HandlerKind,
    /// Attempts per item before it is marked failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Items claimed per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Seconds a claim stays valid before the sweeper may recover it.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Claim priority for enqueued items; higher goes first.
    #[serde(default)]
    pub priority: i32,
    /// Items processed at once within a batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            handler: HandlerKind::default(),
            max_attempts: default_max_attempts(),
            batch_size: default_batch_size(),
            lease_secs: default_lease_secs(),
            priority: 0,
            concurrency: default_concurrency(),
        }
    }
}

impl JobConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn enqueue_options(&self) -> EnqueueOptions {
        EnqueueOptions {
            max_attempts: self.max_attempts,
            priority: self.priority,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_store_retry_initial_ms() -> u64 {
    500
}

fn default_store_retry_max_ms() -> u64 {
    30_000
}

fn default_max_store_failures() -> u32 {
    10
}

/// Worker loop tuning shared by all job types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Sleep between polls when nothing is claimable.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// First backoff after a store error; doubles per consecutive failure.
    #[serde(default = "default_store_retry_initial_ms")]
    pub store_retry_initial_ms: u64,
    /// Backoff ceiling.
    #[serde(default = "default_store_retry_max_ms")]
    pub store_retry_max_ms: u64,
    /// Consecutive store failures before the worker gives up.
    #[serde(default = "default_max_store_failures")]
    pub max_store_failures: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            store_retry_initial_ms: default_store_retry_initial_ms(),
            store_retry_max_ms: default_store_retry_max_ms(),
            max_store_failures: default_max_store_failures(),
        }
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Database URL; `DATABASE_URL` and `--database-url` take precedence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// Worker loop settings.
    #[serde(default)]
    pub worker: WorkerSettings,
    /// Per-job-type configuration.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub jobs: HashMap<String, JobConfig>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    ///
    /// A discovered file that fails to parse is an error; no file at all
    /// yields the defaults.
    pub async fn load() -> Result<Self, WorkQueueError> {
        // Use prefer for file discovery, then parse with serde
        match prefer::load(CONFIG_NAME).await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path).await,
                None => Ok(Self::default()),
            },
            Err(e) => {
                tracing::debug!("No config file discovered: {}", e);
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, WorkQueueError> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            WorkQueueError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse config text in the format named by `ext`.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, WorkQueueError> {
        let config: Config = match ext {
            "toml" => toml::from_str(contents)
                .map_err(|e| WorkQueueError::Config(format!("Failed to parse TOML config: {}", e)))?,
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| WorkQueueError::Config(format!("Failed to parse YAML config: {}", e)))?,
            _ => serde_json::from_str(contents)
                .map_err(|e| WorkQueueError::Config(format!("Failed to parse JSON config: {}", e)))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> Result<(), WorkQueueError> {
        for (job_type, job) in &self.jobs {
            if job.max_attempts == 0 {
                return Err(WorkQueueError::Config(format!(
                    "jobs.{job_type}.max_attempts must be at least 1"
                )));
            }
            if job.batch_size == 0 {
                return Err(WorkQueueError::Config(format!(
                    "jobs.{job_type}.batch_size must be at least 1"
                )));
            }
            if job.concurrency == 0 {
                return Err(WorkQueueError::Config(format!(
                    "jobs.{job_type}.concurrency must be at least 1"
                )));
            }
        }
        if self.worker.max_store_failures == 0 {
            return Err(WorkQueueError::Config(
                "worker.max_store_failures must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path relative to the given base directory.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let path = PathBuf::from(path_str);
        if path.is_absolute() {
            path
        } else {
            base_dir.join(path)
        }
    }

    /// Apply file settings on top of the defaults.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref url) = self.database_url {
            settings.database_url = Some(url.clone());
        }
    }

    /// Configuration for a job type. Unknown job types are an error.
    pub fn job(&self, job_type: &str) -> Result<&JobConfig, WorkQueueError> {
        self.jobs
            .get(job_type)
            .ok_or_else(|| WorkQueueError::UnknownJobType(job_type.to_string()))
    }

    /// Registry with the built-in handler of every configured job type.
    pub fn handler_registry(&self) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        for (job_type, job) in &self.jobs {
            registry.register_kind(job_type.clone(), job.handler.clone());
        }
        registry
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory (--data flag).
    pub data: Option<PathBuf>,
    /// Database URL from the command line.
    pub database_url: Option<String>,
}

/// Load settings with explicit options.
///
/// Precedence for the database: `--database-url`, then `DATABASE_URL`, then
/// the config file, then `<data_dir>/fetchqueue.db`.
pub async fn load_settings_with_options(
    options: LoadOptions,
) -> Result<(Settings, Config), WorkQueueError> {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await?,
        None => Config::load().await?,
    };

    let mut settings = Settings::default();
    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    config.apply_to_settings(&mut settings, &base_dir);

    if let Some(data_dir) = options.data {
        settings.data_dir = data_dir;
    }

    let env_url = std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
    if let Some(database_url) = options.database_url.or(env_url) {
        tracing::debug!(
            "Using database URL override: {}",
            redact_url_password(&database_url)
        );
        settings.database_url = Some(database_url);
    }

    if let Some(ref url) = settings.database_url {
        validate_database_url(url).map_err(WorkQueueError::Config)?;
    }

    Ok((settings, config))
}
