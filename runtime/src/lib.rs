//! # Airlock Runtime
//!
//! Drives step result messages through the airlock status update rules.
//!
//! ## Components
//!
//! - [`StatusUpdateProcessor`]: decodes, validates and applies one batch, dead-lettering
//!   messages that exhaust their deliveries
//! - [`StatusUpdateConsumer`]: long-running loop with graceful shutdown
//! - [`metrics`]: Prometheus counters and the metrics endpoint
//!
//! ## Example
//!
//! ```ignore
//! use airlock_runtime::{StatusUpdateConsumer, StatusUpdateProcessor};
//!
//! let processor = StatusUpdateProcessor::new(repository, publisher, Arc::new(TracingErrorReporter));
//! let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//!
//! let handle = StatusUpdateConsumer::builder()
//!     .receiver(receiver)
//!     .processor(processor)
//!     .shutdown(shutdown_rx)
//!     .build()?
//!     .spawn();
//!
//! // Later
//! shutdown_tx.send(())?;
//! let stats = handle.await?;
//! ```

/// Long-running consumer loop
pub mod consumer;

/// Prometheus metrics for observability
pub mod metrics;

/// Per-batch message processing
pub mod processor;

pub use consumer::{ConsumerError, ConsumerStats, StatusUpdateConsumer, StatusUpdateConsumerBuilder};
pub use processor::{BatchSummary, DEFAULT_MAX_DELIVERY_COUNT, MessageOutcome, StatusUpdateProcessor};
