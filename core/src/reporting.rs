//! Operator-facing error lines.
//!
//! Message failures surface as one fully formatted line each. The sink is a
//! trait so tests can capture the exact lines.

/// Log target used for processing failures.
pub const STATUS_UPDATE_TARGET: &str = "airlock::status_update";

/// Receives one formatted line per failed message.
pub trait ErrorReporter: Send + Sync {
    /// Report a failure.
    fn report(&self, message: &str);
}

/// Forwards reports to `tracing` at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, message: &str) {
        tracing::error!(target: STATUS_UPDATE_TARGET, "{message}");
    }
}
