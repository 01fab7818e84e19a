use metrics_exporter_prometheus::PrometheusBuilder;
use organizing_workers::{
    app_state::{AppState, ConfigSummary},
    config::{ConfigError, WorkerConfig},
    db::{self, events::PgEventSink, queries::PgJobStore, results::PgResultStore},
    models::job::JobType,
    routes,
    services::{
        events::EventSink,
        extraction::{MappingSheetScanProcessor, VisionExtractionClient},
        fwc::{FwcLookupProcessor, HttpFwcSearch},
        processor::ProcessorRegistry,
        results::ResultStore,
        shutdown::{shutdown_worker, ShutdownOutcome},
        store::JobStore,
        worker::Worker,
    },
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting organizing worker");

    let config = WorkerConfig::from_env().expect("Failed to load configuration");
    let job_types = config.validate().expect("Invalid worker configuration");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    describe_metrics();

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db_pool.clone()));
    let events: Arc<dyn EventSink> = Arc::new(PgEventSink::new(db_pool.clone()));
    let results: Arc<dyn ResultStore> = Arc::new(PgResultStore::new(db_pool.clone()));

    let processors = build_processors(&config, &job_types, results)
        .expect("Failed to initialize job processors");

    let (worker, coordinator) =
        Worker::new(store.clone(), events, processors, config.worker_settings());

    // Health and metrics stay up through shutdown so orchestrators can
    // observe the drain.
    let state = AppState::new(
        store,
        coordinator.handle(),
        ConfigSummary::new(&config, job_types.clone()),
    );
    let app = routes::router(state, Some(prometheus_handle));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");
    tracing::info!("Health server listening on {}", config.bind_addr);

    let (server_stop_tx, server_stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                server_stop_rx.await.ok();
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!(job_types = ?job_types, "Worker ready, starting job processing loop");
    let worker_task = tokio::spawn(worker.run());

    shutdown_signal().await;

    let outcome = shutdown_worker(&coordinator, worker_task, config.shutdown_max_wait()).await;
    match outcome {
        ShutdownOutcome::Drained => tracing::info!("Worker drained"),
        ShutdownOutcome::ForceRequeued(job_id) => {
            tracing::warn!(job_id = %job_id, "In-flight job was requeued during shutdown")
        }
        ShutdownOutcome::Abandoned(job_id) => {
            tracing::error!(job_id = %job_id, "In-flight job left locked, stale lock reclaim will recover it")
        }
    }

    server_stop_tx.send(()).ok();
    server.await.ok();
    db_pool.close().await;

    tracing::info!("Worker shutdown complete");
}

fn build_processors(
    config: &WorkerConfig,
    job_types: &[JobType],
    results: Arc<dyn ResultStore>,
) -> Result<ProcessorRegistry, Box<dyn std::error::Error>> {
    let mut registry = ProcessorRegistry::new();

    for job_type in job_types {
        let timeout = config.processing_timeout(*job_type);
        registry = match job_type {
            JobType::FwcLookup => {
                let url = config
                    .fwc_search_url
                    .as_deref()
                    .ok_or(ConfigError::MissingCollaborator {
                        job_type: *job_type,
                        variable: "FWC_SEARCH_URL",
                    })?;
                let search = Arc::new(HttpFwcSearch::new(url)?);
                registry.register(FwcLookupProcessor::new(search, results.clone()), timeout)
            }
            JobType::MappingSheetScan => {
                let (Some(url), Some(key)) = (
                    config.extraction_api_url.as_deref(),
                    config.extraction_api_key.as_deref(),
                ) else {
                    return Err(ConfigError::MissingCollaborator {
                        job_type: *job_type,
                        variable: "EXTRACTION_API_URL",
                    }
                    .into());
                };
                let extractor = Arc::new(VisionExtractionClient::new(url, key)?);
                registry.register(
                    MappingSheetScanProcessor::new(extractor, results.clone()),
                    timeout,
                )
            }
        };
    }

    Ok(registry)
}

fn describe_metrics() {
    metrics::describe_counter!("worker_jobs_claimed_total", "Jobs reserved by this worker");
    metrics::describe_counter!("worker_jobs_succeeded_total", "Jobs completed successfully");
    metrics::describe_counter!("worker_jobs_retried_total", "Failed jobs scheduled for another attempt");
    metrics::describe_counter!("worker_jobs_failed_total", "Jobs that exhausted their attempts");
    metrics::describe_counter!("worker_jobs_interrupted_total", "Jobs requeued by graceful shutdown");
    metrics::describe_counter!("worker_stale_locks_reclaimed_total", "Stale locks released by the reclaimer");
    metrics::describe_histogram!("worker_job_duration_seconds", "Time spent running a job's processor");
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => tracing::info!(signal = "SIGINT", "Shutdown signal received"),
            _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "Shutdown signal received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        tracing::info!("Shutdown signal received");
    }
}
