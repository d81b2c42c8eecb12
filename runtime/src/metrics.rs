//! Prometheus metrics for the status update processor.
//!
//! # Example
//!
//! ```rust,no_run
//! use airlock_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use airlock_core::request::AirlockRequestStatus;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics server.
///
/// Installs the global recorder and serves `/metrics` over HTTP.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
    exporter: Option<tokio::task::JoinHandle<()>>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            handle: None,
            exporter: None,
        }
    }

    /// Install the recorder and start the HTTP listener.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter cannot be built or the
    /// address cannot be bound.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), the new one is
    /// discarded with a warning and no listener is started.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            // Configure histogram buckets for latency measurements
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if let Err(e) = metrics::set_global_recorder(recorder) {
            tracing::warn!(error = %e, "Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        register_metrics();
        self.handle = Some(handle);
        self.exporter = Some(tokio::spawn(async move {
            // ExporterError implements neither Debug nor Display
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        }));

        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

impl Drop for MetricsServer {
    fn drop(&mut self) {
        if let Some(exporter) = self.exporter.take() {
            exporter.abort();
        }
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "airlock_messages_received_total",
        "Total number of step result messages received"
    );
    describe_counter!(
        "airlock_messages_processed_total",
        "Total number of step result messages processed, by outcome"
    );
    describe_counter!(
        "airlock_messages_completed_total",
        "Total number of messages acknowledged"
    );
    describe_counter!(
        "airlock_messages_abandoned_total",
        "Total number of messages left for redelivery"
    );
    describe_counter!(
        "airlock_messages_dead_lettered_total",
        "Total number of messages dead-lettered after too many deliveries, by error kind"
    );
    describe_counter!(
        "airlock_dead_letter_errors_total",
        "Total number of messages that could not be dead-lettered"
    );
    describe_counter!(
        "airlock_complete_errors_total",
        "Total number of acknowledgments rejected by the queue"
    );
    describe_counter!(
        "airlock_events_published_total",
        "Total number of airlock events published"
    );
    describe_counter!(
        "airlock_publish_errors_total",
        "Total number of airlock event publish failures"
    );
    describe_counter!(
        "airlock_status_updates_total",
        "Total number of applied status updates, by new status"
    );
    describe_histogram!(
        "airlock_message_processing_duration_seconds",
        "Time taken to process one step result message"
    );
}

/// Status update processor metrics recorder.
pub struct StatusUpdateMetrics;

impl StatusUpdateMetrics {
    /// Record a received batch.
    pub fn record_batch(size: usize) {
        counter!("airlock_messages_received_total").increment(size as u64);
    }

    /// Record one processed message.
    pub fn record_outcome(outcome: &'static str, duration: Duration) {
        counter!("airlock_messages_processed_total", "outcome" => outcome).increment(1);
        histogram!("airlock_message_processing_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an acknowledged message.
    pub fn record_completed() {
        counter!("airlock_messages_completed_total").increment(1);
    }

    /// Record a message left for redelivery.
    pub fn record_abandoned() {
        counter!("airlock_messages_abandoned_total").increment(1);
    }

    /// Record a dead-lettered message.
    pub fn record_dead_lettered(kind: &'static str) {
        counter!("airlock_messages_dead_lettered_total", "kind" => kind).increment(1);
    }

    /// Record a failed dead-letter write.
    pub fn record_dead_letter_error() {
        counter!("airlock_dead_letter_errors_total").increment(1);
    }

    /// Record a rejected acknowledgment.
    pub fn record_complete_error() {
        counter!("airlock_complete_errors_total").increment(1);
    }

    /// Record a published event.
    pub fn record_publish(topic: &'static str) {
        counter!("airlock_events_published_total", "topic" => topic).increment(1);
    }

    /// Record a publish failure.
    pub fn record_publish_error(topic: &'static str) {
        counter!("airlock_publish_errors_total", "topic" => topic).increment(1);
    }

    /// Record an applied status update.
    pub fn record_status_update(status: AirlockRequestStatus) {
        counter!("airlock_status_updates_total", "status" => status.as_str()).increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        StatusUpdateMetrics::record_batch(3);
        StatusUpdateMetrics::record_outcome("applied", Duration::from_millis(5));
        StatusUpdateMetrics::record_status_update(AirlockRequestStatus::InReview);

        // If another test installed the recorder first, handle is None.
        // That's OK - metrics are still being recorded.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("airlock_messages_received_total"));
            assert!(rendered.contains("airlock_messages_processed_total"));
            assert!(rendered.contains("in_review"));
        }
    }
}
