// Scheduler binary entry point

use common::config::Settings;
use common::events::{EventSink, LogEventSink, NatsEventPublisher};
use common::executor::{CallbackExecutor, HttpCallbackExecutor};
use common::retry::ExponentialBackoff;
use common::scheduler::{SchedulerConfig, SchedulerCore};
use common::store::{DbPool, JobStore, PostgresJobStore};
use common::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let settings = Settings::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    // Initialize structured logging, optionally with OTLP tracing
    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;

    info!("Starting chime scheduler");

    // Prometheus exporter
    telemetry::init_metrics(settings.observability.metrics_port)?;

    // Database connection pool and job store
    info!("Initializing database connection pool");
    let db_pool = DbPool::new(&settings.database).await.map_err(|e| {
        error!(error = %e, "Failed to initialize database pool");
        anyhow::anyhow!(e)
    })?;
    db_pool.health_check().await.map_err(|e| anyhow::anyhow!(e))?;

    let postgres_store = PostgresJobStore::new(db_pool.clone());
    postgres_store
        .ensure_schema()
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    let store: Arc<dyn JobStore> = Arc::new(postgres_store);
    info!("Job store initialized");

    // Event sink: NATS when enabled, structured log otherwise
    let events: Arc<dyn EventSink> = if settings.events.enabled {
        info!("Initializing NATS event publisher");
        let publisher = NatsEventPublisher::connect(settings.events.nats.clone())
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to initialize NATS event publisher");
                anyhow::anyhow!(e)
            })?;
        publisher
            .initialize_stream()
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Arc::new(publisher)
    } else {
        info!("Event bus disabled, publishing events to the log");
        Arc::new(LogEventSink)
    };

    // Callback executor with bounded per-call timeout
    let executor: Arc<dyn CallbackExecutor> = Arc::new(
        HttpCallbackExecutor::new(Duration::from_secs(settings.executor.timeout_seconds))
            .map_err(|e| anyhow::anyhow!(e))?,
    );
    info!(
        timeout_seconds = settings.executor.timeout_seconds,
        "Callback executor initialized"
    );

    // Retry backoff policy
    let retry_policy = Arc::new(ExponentialBackoff::with_config(
        settings.scheduler.retry_base_delay_ms,
        settings.scheduler.retry_max_delay_ms,
        settings.scheduler.retry_jitter_factor,
    ));

    // Scheduler core
    let scheduler_config = SchedulerConfig {
        poll_interval: Duration::from_millis(settings.scheduler.poll_interval_ms),
        claim_lease: Duration::from_millis(settings.scheduler.claim_lease_ms),
        max_retries: settings.scheduler.max_retries,
        max_jobs_per_poll: settings.scheduler.max_jobs_per_poll,
        past_tolerance: Duration::from_millis(settings.scheduler.past_tolerance_ms),
    };
    let scheduler = SchedulerCore::new(scheduler_config, store, executor, events, retry_policy);
    info!("Scheduler core created");

    // Graceful shutdown on ctrl-c
    let scheduler_for_shutdown = Arc::clone(&scheduler);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Received ctrl-c, initiating graceful shutdown");
        scheduler_for_shutdown.stop().await;
    });

    // The first poll doubles as startup recovery: persisted jobs resume
    // without separate re-arming
    info!("Starting scheduler loop");
    if let Err(e) = scheduler.start().await {
        error!(error = %e, "Scheduler error");
        return Err(anyhow::anyhow!(e));
    }

    db_pool.close().await;
    telemetry::shutdown_tracer();
    info!("Scheduler stopped");
    Ok(())
}
