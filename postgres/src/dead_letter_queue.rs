//! Dead-lettered step result messages.
//!
//! Messages the processor gave up on are kept with the failure of their last
//! delivery so an operator can inspect them, fix the cause, and mark them
//! resolved or discarded.

use airlock_core::clock::{Clock, SystemClock};
use airlock_core::dead_letter::{DeadLetter, DeadLetterError, DeadLetterFuture, DeadLetterQueue};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;

/// Review state of a dead letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterStatus {
    /// Waiting for an operator
    Pending,
    /// The cause was fixed (the message may have been re-sent)
    Resolved,
    /// Dropped on purpose
    Discarded,
}

impl DeadLetterStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "resolved" => Some(Self::Resolved),
            "discarded" => Some(Self::Discarded),
            _ => None,
        }
    }
}

/// A stored dead letter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDeadLetter {
    /// Row id
    pub id: i64,
    /// Transport-assigned message id
    pub message_id: String,
    /// Correlation id, if the sender set one
    pub correlation_id: Option<String>,
    /// Raw body text
    pub body: String,
    /// Deliveries attempted
    pub delivery_count: u32,
    /// Metrics label of the last failure
    pub error_kind: String,
    /// Operator line of the last failure
    pub error_message: String,
    /// Review state
    pub status: DeadLetterStatus,
    /// When the message was dead-lettered
    pub dead_lettered_at: DateTime<Utc>,
    /// When it was resolved or discarded
    pub resolved_at: Option<DateTime<Utc>>,
    /// Operator notes
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-backed [`DeadLetterQueue`].
///
/// # Example
///
/// ```no_run
/// use airlock_postgres::PostgresDeadLetterQueue;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dead_letters = PostgresDeadLetterQueue::new(pool);
///
/// for letter in dead_letters.list_pending(100).await? {
///     println!("{}: {}", letter.message_id, letter.error_message);
/// }
/// # Ok(())
/// # }
/// ```
pub struct PostgresDeadLetterQueue {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresDeadLetterQueue {
    /// Use `pool` (migrated by [`PostgresAirlockRequestRepository::migrate`](crate::PostgresAirlockRequestRepository::migrate)).
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use a custom clock for `dead_lettered_at` and `resolved_at`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Store a dead letter and return its row id.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Unavailable`] if the insert fails.
    pub async fn add_entry(&self, letter: &DeadLetter) -> Result<i64, DeadLetterError> {
        let delivery_count = i32::try_from(letter.delivery_count).unwrap_or(i32::MAX);
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO airlock_dead_letters (
                message_id, correlation_id, body, delivery_count,
                error_kind, error_message, dead_lettered_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(&letter.message_id)
        .bind(letter.correlation_id.as_deref())
        .bind(&letter.body)
        .bind(delivery_count)
        .bind(letter.error_kind)
        .bind(&letter.error_message)
        .bind(self.clock.now())
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        tracing::warn!(
            dlq_id = id,
            message_id = %letter.message_id,
            error_kind = letter.error_kind,
            delivery_count = letter.delivery_count,
            "Step result message added to dead letter queue"
        );
        metrics::counter!("airlock_dead_letters_stored_total", "kind" => letter.error_kind)
            .increment(1);

        Ok(id)
    }

    /// Pending dead letters, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Unavailable`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<StoredDeadLetter>, DeadLetterError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r"
            SELECT id, message_id, correlation_id, body, delivery_count, error_kind,
                   error_message, status, dead_lettered_at, resolved_at, resolution_notes
            FROM airlock_dead_letters
            WHERE status = $1
            ORDER BY dead_lettered_at ASC, id ASC
            LIMIT $2
            ",
        )
        .bind(DeadLetterStatus::Pending.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter().map(row_to_dead_letter).collect()
    }

    /// One dead letter by row id.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Unavailable`] if the query fails or no such
    /// row exists.
    pub async fn get_by_id(&self, id: i64) -> Result<StoredDeadLetter, DeadLetterError> {
        let row = sqlx::query(
            r"
            SELECT id, message_id, correlation_id, body, delivery_count, error_kind,
                   error_message, status, dead_lettered_at, resolved_at, resolution_notes
            FROM airlock_dead_letters
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?
        .ok_or_else(|| DeadLetterError::Unavailable(format!("no dead letter with id {id}")))?;

        row_to_dead_letter(&row)
    }

    /// Mark a dead letter resolved.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Unavailable`] if the update fails.
    pub async fn mark_resolved(&self, id: i64, notes: Option<&str>) -> Result<(), DeadLetterError> {
        self.close(id, DeadLetterStatus::Resolved, notes).await
    }

    /// Mark a dead letter discarded.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Unavailable`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, notes: Option<&str>) -> Result<(), DeadLetterError> {
        self.close(id, DeadLetterStatus::Discarded, notes).await
    }

    async fn close(
        &self,
        id: i64,
        status: DeadLetterStatus,
        notes: Option<&str>,
    ) -> Result<(), DeadLetterError> {
        sqlx::query(
            r"
            UPDATE airlock_dead_letters
            SET status = $1, resolved_at = $2, resolution_notes = $3
            WHERE id = $4
            ",
        )
        .bind(status.as_str())
        .bind(self.clock.now())
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        tracing::info!(dlq_id = id, status = status.as_str(), "Dead letter closed");
        Ok(())
    }
}

impl DeadLetterQueue for PostgresDeadLetterQueue {
    fn dead_letter<'a>(&'a self, letter: &'a DeadLetter) -> DeadLetterFuture<'a> {
        Box::pin(async move { self.add_entry(letter).await.map(|_| ()) })
    }
}

#[allow(clippy::needless_pass_by_value)] // Used as a map_err adapter
fn unavailable(error: sqlx::Error) -> DeadLetterError {
    DeadLetterError::Unavailable(error.to_string())
}

fn row_to_dead_letter(row: &PgRow) -> Result<StoredDeadLetter, DeadLetterError> {
    let status: String = row.try_get("status").map_err(unavailable)?;
    let delivery_count: i32 = row.try_get("delivery_count").map_err(unavailable)?;

    Ok(StoredDeadLetter {
        id: row.try_get("id").map_err(unavailable)?,
        message_id: row.try_get("message_id").map_err(unavailable)?,
        correlation_id: row.try_get("correlation_id").map_err(unavailable)?,
        body: row.try_get("body").map_err(unavailable)?,
        delivery_count: u32::try_from(delivery_count).unwrap_or_default(),
        error_kind: row.try_get("error_kind").map_err(unavailable)?,
        error_message: row.try_get("error_message").map_err(unavailable)?,
        status: DeadLetterStatus::parse(&status).ok_or_else(|| {
            DeadLetterError::Unavailable(format!("stored dead letter status '{status}' is not recognized"))
        })?,
        dead_lettered_at: row.try_get("dead_lettered_at").map_err(unavailable)?,
        resolved_at: row.try_get("resolved_at").map_err(unavailable)?,
        resolution_notes: row.try_get("resolution_notes").map_err(unavailable)?,
    })
}
