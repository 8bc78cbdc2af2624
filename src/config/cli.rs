use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use uuid::Uuid;

/// Command-line arguments for the docflow binary.
#[derive(Debug, Parser)]
#[command(name = "docflow", version, about = "Durable document job dispatcher")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "DOCFLOW_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run worker loops until interrupted.
    Worker(Box<WorkerArgs>),
    /// Insert a job into the queue and print its id.
    Enqueue(EnqueueArgs),
    /// Print a job record as JSON.
    Job(JobArgs),
    /// Fail jobs whose claim outlived the configured lease.
    Recover(RecoverArgs),
    /// Render a template file without the queue or database.
    Render(RenderArgs),
    /// List the fields referenced by a template file.
    Scan(ScanArgs),
    /// Apply pending database migrations.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct EngineOverrides {
    /// Override the document converter executable.
    #[arg(long = "engine-converter-path", value_name = "PATH")]
    pub converter_path: Option<PathBuf>,

    /// Override the directory holding engine license files.
    #[arg(long = "engine-license-dir", value_name = "PATH")]
    pub license_dir: Option<PathBuf>,

    /// Override the base directory for temporary conversion files.
    #[arg(long = "engine-work-dir", value_name = "PATH")]
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub overrides: WorkerOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WorkerOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub engine: EngineOverrides,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the number of worker loops in this process.
    #[arg(long = "worker-concurrency", value_name = "COUNT")]
    pub worker_concurrency: Option<u32>,

    /// Override the idle poll interval.
    #[arg(long = "worker-poll-interval-ms", value_name = "MILLIS")]
    pub worker_poll_interval_ms: Option<u64>,

    /// Override the claim lease; 0 disables the stale-claim sweep.
    #[arg(long = "worker-stale-after-seconds", value_name = "SECONDS")]
    pub worker_stale_after_seconds: Option<u64>,

    /// Override the worker identity stamped on claimed jobs.
    #[arg(long = "worker-id", value_name = "ID")]
    pub worker_id: Option<String>,

    /// Override the document storage directory.
    #[arg(long = "storage-directory", value_name = "PATH")]
    pub storage_directory: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct EnqueueArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(subcommand)]
    pub command: EnqueueCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum EnqueueCommand {
    /// Convert a stored document to PDF.
    Process(EnqueueProcessArgs),
    /// Render a stored template with a data file.
    Generate(EnqueueGenerateArgs),
}

#[derive(Debug, Args, Clone)]
pub struct EnqueueProcessArgs {
    #[arg(long = "document-id", value_name = "ID")]
    pub document_id: String,

    /// Source extension; defaults to docx.
    #[arg(long, value_name = "EXT")]
    pub ext: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct EnqueueGenerateArgs {
    #[arg(long = "document-id", value_name = "ID")]
    pub document_id: String,

    /// JSON file with the render data.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub data: PathBuf,

    /// Output format (pdf|html|json).
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct JobArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[arg(value_name = "UUID")]
    pub id: Uuid,
}

#[derive(Debug, Args, Clone)]
pub struct RecoverArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub engine: EngineOverrides,

    /// Template file (document graph JSON or plain text).
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub template: PathBuf,

    /// JSON file with the render data.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub data: PathBuf,

    /// Destination file.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,

    /// Output format (pdf|html|json).
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Keep unresolved tags visible.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub preserve: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ScanArgs {
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub template: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}
