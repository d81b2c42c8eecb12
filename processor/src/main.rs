//! Airlock status update processor.
//!
//! This binary:
//! - Connects to the `PostgreSQL` airlock request store (and migrates it)
//! - Subscribes to the step result topic on Redpanda
//! - Applies step results to airlock requests and publishes the follow-up events
//! - Runs until Ctrl+C, then finishes the in-flight batch
//!
//! # Usage
//!
//! ```bash
//! # Start infrastructure
//! docker compose up -d
//!
//! # Run processor
//! cargo run --bin airlock-processor
//! ```

use airlock_core::reporting::TracingErrorReporter;
use airlock_postgres::{PoolSettings, PostgresAirlockRequestRepository};
use airlock_processor::{Config, init_tracing};
use airlock_redpanda::{RedpandaEventPublisher, RedpandaMessageReceiver};
use airlock_runtime::metrics::MetricsServer;
use airlock_runtime::{StatusUpdateConsumer, StatusUpdateProcessor};
use std::sync::Arc;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Loads .env first so RUST_LOG from it reaches the subscriber
    let config = Config::from_env()?;
    init_tracing();
    if let Some(path) = &config.env_file {
        tracing::debug!(path = %path.display(), "Loaded .env file");
    }

    tracing::info!(
        brokers = %config.redpanda.brokers,
        step_result_topic = %config.redpanda.step_result_topic,
        consumer_group = %config.redpanda.consumer_group,
        batch_size = config.processor.batch_size,
        max_concurrency = config.processor.max_concurrency,
        max_delivery_count = config.processor.max_delivery_count,
        "Starting airlock status update processor"
    );

    let _metrics_server = if config.metrics.enabled {
        let mut server = MetricsServer::new(config.metrics.listen_addr);
        server.start()?;
        Some(server)
    } else {
        None
    };

    let repository = PostgresAirlockRequestRepository::connect(
        &config.postgres.url,
        &PoolSettings {
            max_connections: config.postgres.max_connections,
            connect_timeout: config.postgres.connect_timeout,
        },
    )
    .await?;
    if config.postgres.run_migrations {
        repository.migrate().await?;
    }

    let receiver = RedpandaMessageReceiver::builder()
        .brokers(&config.redpanda.brokers)
        .topic(&config.redpanda.step_result_topic)
        .consumer_group(&config.redpanda.consumer_group)
        .auto_offset_reset(&config.redpanda.auto_offset_reset)
        .build()?;

    let publisher = RedpandaEventPublisher::builder()
        .brokers(&config.redpanda.brokers)
        .producer_acks(&config.redpanda.producer_acks)
        .topic_prefix(&config.redpanda.topic_prefix)
        .build()?;

    let dead_letters = repository.dead_letter_queue();
    let processor = StatusUpdateProcessor::new(
        Arc::new(repository),
        Arc::new(publisher),
        Arc::new(TracingErrorReporter),
    )
    .with_max_concurrency(config.processor.max_concurrency)
    .with_dead_letter_queue(Arc::new(dead_letters), config.processor.max_delivery_count);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let consumer = StatusUpdateConsumer::builder()
        .receiver(Arc::new(receiver))
        .processor(processor)
        .shutdown(shutdown_rx)
        .batch_size(config.processor.batch_size)
        .max_wait(config.processor.max_wait)
        .retry_delay(config.processor.retry_delay)
        .redelivery_delay(config.processor.redelivery_delay)
        .build()?
        .spawn();

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down gracefully...");
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(config.processor.shutdown_timeout, consumer).await {
        Ok(Ok(stats)) => tracing::info!(
            batches = stats.batches,
            received = stats.totals.received,
            applied = stats.totals.applied,
            completed = stats.totals.completed,
            abandoned = stats.totals.abandoned,
            dead_lettered = stats.totals.dead_lettered,
            "Processor stopped"
        ),
        Ok(Err(e)) => tracing::error!(error = %e, "Consumer task failed"),
        Err(_) => tracing::warn!(
            timeout_secs = config.processor.shutdown_timeout.as_secs(),
            "Shutdown timed out; unsettled messages will be redelivered"
        ),
    }

    Ok(())
}
