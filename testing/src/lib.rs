//! # Airlock Testing
//!
//! In-memory stand-ins for every collaborator of the status update processor,
//! plus fixtures shaped like real pipeline traffic.
//!
//! - [`InMemoryAirlockRequestRepository`]: `HashMap`-backed repository with failure injection
//! - [`RecordingEventPublisher`]: captures published events
//! - [`InMemoryMessageQueue`]: batch queue with lock-expiry redelivery
//! - [`InMemoryDeadLetterQueue`]: captures dead-lettered messages
//! - [`RecordingErrorReporter`]: captures reported error lines
//! - [`FixedClock`]: deterministic time
//!
//! ## Example
//!
//! ```ignore
//! use airlock_testing::{fixtures, InMemoryAirlockRequestRepository, InMemoryMessageQueue};
//!
//! let repository = InMemoryAirlockRequestRepository::new();
//! repository.insert(fixtures::sample_airlock_request(AirlockRequestStatus::Submitted));
//!
//! let queue = InMemoryMessageQueue::new();
//! queue.send(fixtures::step_result_body("submitted", "in_review", fixtures::AIRLOCK_REQUEST_ID));
//! ```

pub mod fixtures;
pub mod queue_mocks;
pub mod repository_mocks;

/// Mock implementations of injected services.
pub mod mocks {
    use airlock_core::clock::Clock;
    use airlock_core::reporting::ErrorReporter;
    use chrono::{DateTime, Utc};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use airlock_testing::mocks::FixedClock;
    /// use airlock_core::clock::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Error reporter that keeps every line it is given.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingErrorReporter {
        lines: Arc<Mutex<Vec<String>>>,
    }

    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable in tests
    impl RecordingErrorReporter {
        /// Create an empty reporter
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// All reported lines, oldest first
        #[must_use]
        pub fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }

        /// Number of reported lines
        #[must_use]
        pub fn count(&self) -> usize {
            self.lines.lock().unwrap().len()
        }

        /// Most recent line
        #[must_use]
        pub fn last(&self) -> Option<String> {
            self.lines.lock().unwrap().last().cloned()
        }
    }

    #[allow(clippy::unwrap_used)]
    impl ErrorReporter for RecordingErrorReporter {
        fn report(&self, message: &str) {
            self.lines.lock().unwrap().push(message.to_string());
        }
    }
}

/// Install a test-friendly `tracing` subscriber.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, RecordingErrorReporter, test_clock};
pub use queue_mocks::{InMemoryDeadLetterQueue, InMemoryMessageQueue};
pub use repository_mocks::{InMemoryAirlockRequestRepository, RecordingEventPublisher, UpdateCall};
