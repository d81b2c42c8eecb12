//! # Airlock Processor
//!
//! Service wiring for the airlock status update processor: configuration and
//! tracing bootstrap. The binary in `main.rs` connects the `PostgreSQL`
//! repository, the Redpanda receiver and publisher, and runs the consumer
//! until Ctrl+C.

pub mod config;

pub use config::{Config, ConfigError, MetricsConfig, PostgresConfig, ProcessorConfig, RedpandaConfig};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "warn,airlock=info";

/// Install the global `tracing` subscriber (fmt layer + `RUST_LOG` filter).
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
