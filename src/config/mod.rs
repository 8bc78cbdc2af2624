//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{
    CliArgs, Command, DatabaseOverride, EngineOverrides, EnqueueArgs, EnqueueCommand,
    EnqueueGenerateArgs, EnqueueProcessArgs, JobArgs, MigrateArgs, RecoverArgs, RenderArgs,
    ScanArgs, WorkerArgs, WorkerOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "docflow";
const ENV_PREFIX: &str = "DOCFLOW";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_ERROR_BACKOFF_FACTOR: u32 = 5;
const DEFAULT_WORKER_CONCURRENCY: u32 = 1;
const DEFAULT_STALE_AFTER_SECS: u64 = 3600;
pub(crate) const DEFAULT_CONVERTER_PATH: &str = "soffice";
const DEFAULT_LICENSE_DIR: &str = "licenses";
const DEFAULT_STORAGE_DIR: &str = "storage";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub worker: WorkerSettings,
    pub engine: EngineSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub id: String,
    pub poll_interval: Duration,
    pub error_backoff_factor: NonZeroU32,
    pub concurrency: NonZeroU32,
    /// `None` when the stale-claim sweep is disabled.
    pub stale_after: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub converter_path: PathBuf,
    pub license_dir: PathBuf,
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Worker(args)) => raw.apply_worker_overrides(&args.overrides),
        Some(Command::Enqueue(args)) => raw.apply_database_override(&args.database),
        Some(Command::Job(args)) => raw.apply_database_override(&args.database),
        Some(Command::Recover(args)) => raw.apply_database_override(&args.database),
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        Some(Command::Render(args)) => raw.apply_engine_overrides(&args.engine),
        Some(Command::Scan(_)) => {}
        None => raw.apply_worker_overrides(&WorkerOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    worker: RawWorkerSettings,
    engine: RawEngineSettings,
    storage: RawStorageSettings,
}

impl RawSettings {
    fn apply_worker_overrides(&mut self, overrides: &WorkerOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(value) = overrides.worker_concurrency {
            self.worker.concurrency = Some(value);
        }
        if let Some(value) = overrides.worker_poll_interval_ms {
            self.worker.poll_interval_ms = Some(value);
        }
        if let Some(value) = overrides.worker_stale_after_seconds {
            self.worker.stale_after_seconds = Some(value);
        }
        if let Some(id) = overrides.worker_id.as_ref() {
            self.worker.id = Some(id.clone());
        }
        if let Some(directory) = overrides.storage_directory.as_ref() {
            self.storage.directory = Some(directory.clone());
        }
        self.apply_database_override(&overrides.database);
        self.apply_engine_overrides(&overrides.engine);
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_engine_overrides(&mut self, overrides: &EngineOverrides) {
        if let Some(path) = overrides.converter_path.as_ref() {
            self.engine.converter_path = Some(path.clone());
        }
        if let Some(dir) = overrides.license_dir.as_ref() {
            self.engine.license_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.work_dir.as_ref() {
            self.engine.work_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            worker,
            engine,
            storage,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            worker: build_worker_settings(worker)?,
            engine: build_engine_settings(engine)?,
            storage: build_storage_settings(storage)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_worker_settings(worker: RawWorkerSettings) -> Result<WorkerSettings, LoadError> {
    let poll_interval_ms = worker.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
    let poll_interval_ms = NonZeroU64::new(poll_interval_ms).ok_or_else(|| {
        LoadError::invalid("worker.poll_interval_ms", "must be greater than zero")
    })?;

    let error_backoff_factor = non_zero_u32(
        worker
            .error_backoff_factor
            .unwrap_or(DEFAULT_ERROR_BACKOFF_FACTOR)
            .into(),
        "worker.error_backoff_factor",
    )?;
    let concurrency = non_zero_u32(
        worker
            .concurrency
            .unwrap_or(DEFAULT_WORKER_CONCURRENCY)
            .into(),
        "worker.concurrency",
    )?;

    let stale_after = match worker.stale_after_seconds.unwrap_or(DEFAULT_STALE_AFTER_SECS) {
        0 => None,
        seconds => Some(Duration::from_secs(seconds)),
    };

    let id = match worker.id {
        Some(id) if id.trim().is_empty() => {
            return Err(LoadError::invalid("worker.id", "must not be empty"));
        }
        Some(id) => id.trim().to_string(),
        None => default_worker_id(),
    };

    Ok(WorkerSettings {
        id,
        poll_interval: Duration::from_millis(poll_interval_ms.get()),
        error_backoff_factor,
        concurrency,
        stale_after,
    })
}

fn build_engine_settings(engine: RawEngineSettings) -> Result<EngineSettings, LoadError> {
    let converter_path = engine
        .converter_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONVERTER_PATH));
    if converter_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "engine.converter_path",
            "path must not be empty",
        ));
    }

    let license_dir = engine
        .license_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LICENSE_DIR));
    if license_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "engine.license_dir",
            "path must not be empty",
        ));
    }

    let work_dir = engine
        .work_dir
        .filter(|dir| !dir.as_os_str().is_empty());

    Ok(EngineSettings {
        converter_path,
        license_dir,
        work_dir,
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let directory = storage
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "storage.directory",
            "path must not be empty",
        ));
    }
    Ok(StorageSettings { directory })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkerSettings {
    id: Option<String>,
    poll_interval_ms: Option<u64>,
    error_backoff_factor: Option<u32>,
    concurrency: Option<u32>,
    stale_after_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEngineSettings {
    converter_path: Option<PathBuf>,
    license_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    directory: Option<PathBuf>,
}

fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "docflow".to_string());
    format!("{host}-{}", std::process::id())
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }

    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;

    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
