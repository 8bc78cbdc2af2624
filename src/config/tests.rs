use super::*;
use serial_test::serial;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.worker.poll_interval_ms = Some(2000);
    raw.logging.level = Some("info".to_string());

    let overrides = WorkerOverrides {
        worker_poll_interval_ms: Some(250),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_worker_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.worker.poll_interval, Duration::from_millis(250));
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_match_documented_values() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.worker.poll_interval, Duration::from_secs(1));
    assert_eq!(settings.worker.error_backoff_factor.get(), 5);
    assert_eq!(settings.worker.concurrency.get(), 1);
    assert_eq!(settings.worker.stale_after, Some(Duration::from_secs(3600)));
    assert_eq!(settings.database.max_connections.get(), 8);
    assert_eq!(settings.engine.converter_path, PathBuf::from("soffice"));
    assert_eq!(settings.engine.license_dir, PathBuf::from("licenses"));
    assert_eq!(settings.storage.directory, PathBuf::from("storage"));
    assert!(settings.database.url.is_none());
    assert!(!settings.worker.id.is_empty());
}

#[test]
fn zero_lease_disables_the_sweep() {
    let mut raw = RawSettings::default();
    raw.worker.stale_after_seconds = Some(0);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.worker.stale_after, None);
}

#[test]
fn zero_concurrency_is_rejected() {
    let mut raw = RawSettings::default();
    raw.worker.concurrency = Some(0);
    let err = Settings::from_raw(raw).expect_err("invalid settings");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "worker.concurrency",
            ..
        }
    ));
}

#[test]
fn blank_database_url_is_treated_as_missing() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.database.url.is_none());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = WorkerOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_worker_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_worker_command() {
    let args = CliArgs::parse_from(["docflow"]);
    let command = args
        .command
        .unwrap_or(Command::Worker(Box::<WorkerArgs>::default()));
    assert!(matches!(command, Command::Worker(_)));
}

#[test]
fn parse_enqueue_generate_arguments() {
    let args = CliArgs::parse_from([
        "docflow",
        "enqueue",
        "--database-url",
        "postgres://example",
        "generate",
        "--document-id",
        "6d1c4c52-2a4b-4b1e-9f7e-0d7a8f4c2b11",
        "--data",
        "/tmp/data.json",
        "--format",
        "html",
    ]);

    match args.command.expect("enqueue command") {
        Command::Enqueue(enqueue) => {
            assert_eq!(
                enqueue.database.database_url.as_deref(),
                Some("postgres://example")
            );
            match enqueue.command {
                EnqueueCommand::Generate(generate) => {
                    assert_eq!(
                        generate.document_id.to_string(),
                        "6d1c4c52-2a4b-4b1e-9f7e-0d7a8f4c2b11"
                    );
                    assert_eq!(generate.data, std::path::Path::new("/tmp/data.json"));
                    assert_eq!(generate.format.as_deref(), Some("html"));
                }
                EnqueueCommand::Process(_) => panic!("wrong enqueue command parsed"),
            }
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_render_arguments() {
    let args = CliArgs::parse_from([
        "docflow",
        "render",
        "--template",
        "invoice.json",
        "--data",
        "data.json",
        "--output",
        "out.html",
        "--format",
        "html",
        "--preserve",
    ]);

    match args.command.expect("render command") {
        Command::Render(render) => {
            assert_eq!(render.template, std::path::Path::new("invoice.json"));
            assert_eq!(render.format.as_deref(), Some("html"));
            assert!(render.preserve);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_worker_overrides() {
    let args = CliArgs::parse_from([
        "docflow",
        "worker",
        "--worker-concurrency",
        "4",
        "--database-url",
        "postgres://override",
    ]);

    match args.command.expect("worker command") {
        Command::Worker(worker) => {
            assert_eq!(worker.overrides.worker_concurrency, Some(4));
            assert_eq!(
                worker.overrides.database.database_url.as_deref(),
                Some("postgres://override")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
#[serial]
fn environment_layer_feeds_typed_settings() {
    // SAFETY: serialized with every other test that touches the environment.
    unsafe {
        std::env::set_var("DOCFLOW__WORKER__POLL_INTERVAL_MS", "125");
        std::env::set_var("DOCFLOW__STORAGE__DIRECTORY", "/var/lib/docflow");
    }

    let args = CliArgs::parse_from(["docflow", "scan", "--template", "t.txt"]);
    let result = load(&args);

    unsafe {
        std::env::remove_var("DOCFLOW__WORKER__POLL_INTERVAL_MS");
        std::env::remove_var("DOCFLOW__STORAGE__DIRECTORY");
    }

    let settings = result.expect("settings");
    assert_eq!(settings.worker.poll_interval, Duration::from_millis(125));
    assert_eq!(
        settings.storage.directory,
        PathBuf::from("/var/lib/docflow")
    );
}
