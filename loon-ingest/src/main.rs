use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use loon_ingest::{FsSink, IngestConfig, IngestService, transport};

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("LOON_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("loon_ingest={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = IngestConfig::from_env()?;
    std::fs::create_dir_all(&config.storage_root)?;
    tracing::info!(
        workers = config.workers,
        storage_root = %config.storage_root.display(),
        upload_root = %config.upload_root.display(),
        "Configuration loaded"
    );

    let sink = Arc::new(FsSink::new(config.storage_root.clone()));
    let service = Arc::new(IngestService::new(&config, sink));

    transport::serve(config.server(), service).await
}
