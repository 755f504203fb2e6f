use anyhow::{Context, Result};
use event_processor::api::{start_api_server, AppState};
use event_processor::config::Config;
use event_processor::ingest::UploadCoordinator;
use event_processor::media::MediaStore;
use event_processor::metadata_store::{MetadataStore, SourceRepository};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Event Processor"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let metadata_store = MetadataStore::new(&config.database)
        .await
        .context("Failed to initialize metadata store")?;

    // Run migrations if enabled
    if config.database.run_migrations {
        metadata_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let store: Arc<dyn SourceRepository> = Arc::new(metadata_store);

    let media = Arc::new(
        MediaStore::from_config(&config.storage).context("Failed to resolve storage roots")?,
    );
    media
        .ensure_roots()
        .await
        .context("Failed to create upload directories")?;

    let coordinator = Arc::new(UploadCoordinator::new(store.clone(), media.clone()));

    // Create API state
    let api_state = AppState {
        store,
        coordinator,
        media,
    };

    info!("Event processor started successfully");

    if let Err(e) = start_api_server(
        api_state,
        &config.api,
        config.storage.max_upload_bytes,
        shutdown_signal(),
    )
    .await
    {
        error!(error = %e, "API server error");
        return Err(e);
    }

    info!("Event processor stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Shutting down event processor");
}
