use std::{path::Path, process, sync::Arc};

use docflow::{
    application::{
        audit::AuditService,
        engine::DocumentEngine,
        error::AppError,
        jobs::{
            JobWorkerContext, Worker, WorkerOptions, enqueue_generate_template,
            enqueue_process_document, recover_stale_jobs,
        },
        repos::JobsRepo,
        scanner::mapping_skeleton,
        template::RenderOptions,
    },
    config,
    domain::types::OutputFormat,
    infra::{
        db::PostgresRepositories, engine::OfficeEngine, error::InfraError,
        storage::DocumentStorage, telemetry,
    },
};
use futures::future::join_all;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Worker(Box::<config::WorkerArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Worker(_) => run_workers(settings).await,
        config::Command::Enqueue(args) => run_enqueue(settings, args).await,
        config::Command::Job(args) => run_show_job(settings, args).await,
        config::Command::Recover(_) => run_recover(settings).await,
        config::Command::Render(args) => run_render(settings, args).await,
        config::Command::Scan(args) => run_scan(settings, args).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_workers(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    PostgresRepositories::run_migrations(repositories.pool())
        .await
        .map_err(InfraError::from)?;
    let context = build_job_context(repositories, &settings)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let concurrency = settings.worker.concurrency.get();
    let mut handles = Vec::with_capacity(concurrency as usize);

    for index in 0..concurrency {
        let worker_id = if concurrency == 1 {
            settings.worker.id.clone()
        } else {
            format!("{}-{index}", settings.worker.id)
        };
        let options = WorkerOptions {
            worker_id,
            poll_interval: settings.worker.poll_interval,
            error_backoff_factor: settings.worker.error_backoff_factor.get(),
            stale_after: settings.worker.stale_after,
        };
        let worker = Worker::new(context.clone(), options);
        handles.push(tokio::spawn(worker.run(shutdown_rx.clone())));
    }

    info!(concurrency, "workers running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!("shutdown requested; waiting for in-flight jobs");
    let _ = shutdown_tx.send(true);

    for outcome in join_all(handles).await {
        if let Err(err) = outcome {
            error!(error = %err, "worker task ended abnormally");
        }
    }

    Ok(())
}

async fn run_enqueue(settings: config::Settings, args: config::EnqueueArgs) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;

    let id = match args.command {
        config::EnqueueCommand::Process(process) => {
            enqueue_process_document(&repositories, &process.document_id, process.ext).await?
        }
        config::EnqueueCommand::Generate(generate) => {
            let data = read_json(&generate.data).await?;
            let format = generate
                .format
                .as_deref()
                .map(parse_output_format)
                .transpose()?;
            enqueue_generate_template(&repositories, &generate.document_id, data, format).await?
        }
    };

    info!(job_id = %id, "job enqueued");
    println!("{id}");
    Ok(())
}

async fn run_show_job(settings: config::Settings, args: config::JobArgs) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let job = repositories.find_job(args.id).await?.ok_or(AppError::NotFound)?;
    print_json(&job)
}

async fn run_recover(settings: config::Settings) -> Result<(), AppError> {
    let stale_after = settings
        .worker
        .stale_after
        .ok_or_else(|| AppError::validation("worker.stale_after_seconds is 0; sweep disabled"))?;

    let repositories = init_repositories(&settings).await?;
    let context = build_job_context(repositories, &settings)?;
    let recovered = recover_stale_jobs(&context, stale_after).await?;

    print_json(&json!({ "recovered": recovered }))
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let engine = OfficeEngine::from_settings(&settings.engine);
    let template = read_bytes(&args.template).await?;
    let data = read_json(&args.data).await?;
    let format = args
        .format
        .as_deref()
        .map(parse_output_format)
        .transpose()?
        .unwrap_or_default();
    let options = if args.preserve {
        RenderOptions::preview(format)
    } else {
        RenderOptions::final_render(format)
    };

    let rendered = engine.render_template(&template, &data, &options).await?;
    tokio::fs::write(&args.output, &rendered)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        output = %args.output.display(),
        format = format.as_str(),
        bytes = rendered.len(),
        "template rendered"
    );
    Ok(())
}

async fn run_scan(settings: config::Settings, args: config::ScanArgs) -> Result<(), AppError> {
    let engine = OfficeEngine::from_settings(&settings.engine);
    let template = read_bytes(&args.template).await?;
    let fields = engine.scan_fields(&template);
    let mapping = mapping_skeleton(&fields);

    print_json(&json!({ "fields": fields, "mapping": mapping }))
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    PostgresRepositories::run_migrations(repositories.pool())
        .await
        .map_err(InfraError::from)?;
    info!("migrations applied");
    Ok(())
}

async fn init_repositories(settings: &config::Settings) -> Result<PostgresRepositories, AppError> {
    let url = settings.database.url.as_deref().ok_or_else(|| {
        AppError::from(InfraError::configuration(
            "database.url is required (set DOCFLOW__DATABASE__URL or --database-url)",
        ))
    })?;

    let pool = PostgresRepositories::connect(url, settings.database.max_connections.get())
        .await
        .map_err(InfraError::from)?;
    let repositories = PostgresRepositories::new(pool);
    repositories
        .health_check()
        .await
        .map_err(InfraError::from)?;
    Ok(repositories)
}

fn build_job_context(
    repositories: PostgresRepositories,
    settings: &config::Settings,
) -> Result<JobWorkerContext, AppError> {
    let repositories = Arc::new(repositories);
    let storage = DocumentStorage::new(settings.storage.directory.clone())
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let engine: Arc<dyn DocumentEngine> = Arc::new(OfficeEngine::from_settings(&settings.engine));

    Ok(JobWorkerContext {
        jobs: repositories.clone(),
        documents: repositories.clone(),
        audit: AuditService::new(repositories),
        engine,
        storage: Arc::new(storage),
    })
}

fn parse_output_format(raw: &str) -> Result<OutputFormat, AppError> {
    OutputFormat::try_from(raw)
        .map_err(|_| AppError::validation(format!("unknown output format `{raw}`")))
}

async fn read_bytes(path: &Path) -> Result<Vec<u8>, AppError> {
    tokio::fs::read(path)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))
}

async fn read_json(path: &Path) -> Result<Value, AppError> {
    let bytes = read_bytes(path).await?;
    serde_json::from_slice(&bytes).map_err(|err| {
        AppError::validation(format!("`{}` is not valid JSON: {err}", path.display()))
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to serialize output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
