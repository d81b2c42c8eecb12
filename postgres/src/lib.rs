//! `PostgreSQL` airlock request repository.
//!
//! Implements [`AirlockRequestRepository`] from `airlock-core` on top of a
//! `sqlx` connection pool:
//!
//! - Status updates guarded by optimistic concurrency (`WHERE status = previous`)
//! - Transition re-validation before anything is written
//! - A history row per status change, written in the same transaction
//! - A dead letter table for messages the processor gave up on
//! - Embedded migrations
//!
//! # Example
//!
//! ```ignore
//! use airlock_postgres::PostgresAirlockRequestRepository;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let repository = PostgresAirlockRequestRepository::new("postgres://localhost/airlock").await?;
//!     repository.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod dead_letter_queue;

pub use dead_letter_queue::{DeadLetterStatus, PostgresDeadLetterQueue, StoredDeadLetter};

use airlock_core::clock::{Clock, SystemClock};
use airlock_core::repository::{AirlockRequestRepository, RepositoryError, RepositoryFuture};
use airlock_core::request::{
    AirlockFile, AirlockRequest, AirlockRequestStatus, AirlockRequestType, User,
};
use airlock_core::transition::check_transition;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;

/// One recorded status change.
#[derive(Debug, Clone, PartialEq)]
pub struct AirlockRequestHistoryItem {
    /// Status before the change
    pub previous_status: AirlockRequestStatus,
    /// Status after the change
    pub new_status: AirlockRequestStatus,
    /// Who made the change
    pub changed_by: User,
    /// When the change was made
    pub changed_when: DateTime<Utc>,
}

/// Pool settings for [`PostgresAirlockRequestRepository::connect`].
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Upper bound on open connections
    pub max_connections: u32,
    /// How long to wait for a connection
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

const SELECT_REQUEST_BY_ID: &str = r"
    SELECT id, workspace_id, request_type, files, business_justification,
           status, owner, created_when, updated_when, updated_by
    FROM airlock_requests
    WHERE id = $1
";

/// `PostgreSQL`-backed [`AirlockRequestRepository`].
pub struct PostgresAirlockRequestRepository {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresAirlockRequestRepository {
    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Unavailable`] if the database cannot be reached.
    pub async fn new(database_url: &str) -> Result<Self, RepositoryError> {
        Self::connect(database_url, &PoolSettings::default()).await
    }

    /// Connect with explicit pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Unavailable`] if the database cannot be reached.
    pub async fn connect(
        database_url: &str,
        settings: &PoolSettings,
    ) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.connect_timeout)
            .connect(database_url)
            .await
            .map_err(unavailable)?;

        tracing::info!(
            max_connections = settings.max_connections,
            "Connected to airlock request database"
        );
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use a custom clock for `updated_when` and history timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Dead letter store on the same pool and clock.
    #[must_use]
    pub fn dead_letter_queue(&self) -> PostgresDeadLetterQueue {
        PostgresDeadLetterQueue::new(self.pool.clone()).with_clock(Arc::clone(&self.clock))
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Unavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Unavailable(format!("migration failed: {e}")))?;
        tracing::info!("Airlock request schema is up to date");
        Ok(())
    }

    /// Store a new request.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Unavailable`] if the insert fails (including a
    /// duplicate id).
    pub async fn insert(&self, request: &AirlockRequest) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO airlock_requests (
                id, workspace_id, request_type, files, business_justification,
                status, owner, created_when, updated_when, updated_by
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(&request.id)
        .bind(&request.workspace_id)
        .bind(request.request_type.as_str())
        .bind(Json(&request.files))
        .bind(&request.business_justification)
        .bind(request.status.as_str())
        .bind(Json(&request.user))
        .bind(request.created_when)
        .bind(request.updated_when)
        .bind(request.updated_by.as_ref().map(Json))
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        tracing::debug!(request_id = %request.id, status = request.status.as_str(), "Airlock request stored");
        Ok(())
    }

    /// Status changes of a request, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Unavailable`] if the query fails or a row
    /// holds an unknown status.
    pub async fn history(
        &self,
        request_id: &str,
    ) -> Result<Vec<AirlockRequestHistoryItem>, RepositoryError> {
        let rows = sqlx::query(
            r"
            SELECT previous_status, new_status, changed_by, changed_when
            FROM airlock_request_history
            WHERE request_id = $1
            ORDER BY changed_when ASC, id ASC
            ",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter().map(row_to_history_item).collect()
    }

    async fn fetch(&self, request_id: &str) -> Result<AirlockRequest, RepositoryError> {
        let row = sqlx::query(SELECT_REQUEST_BY_ID)
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| RepositoryError::NotFound(request_id.to_string()))?;

        row_to_request(&row)
    }

    async fn apply_update(
        &self,
        request: &AirlockRequest,
        new_status: AirlockRequestStatus,
        user: &User,
    ) -> Result<AirlockRequest, RepositoryError> {
        check_transition(request.status, new_status)?;
        let now = self.clock.now();

        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        let updated = sqlx::query(
            r"
            UPDATE airlock_requests
            SET status = $1, updated_by = $2, updated_when = $3
            WHERE id = $4 AND status = $5
            RETURNING id, workspace_id, request_type, files, business_justification,
                      status, owner, created_when, updated_when, updated_by
            ",
        )
        .bind(new_status.as_str())
        .bind(Json(user))
        .bind(now)
        .bind(&request.id)
        .bind(request.status.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(unavailable)?;

        let Some(row) = updated else {
            let exists: Option<(String,)> =
                sqlx::query_as("SELECT id FROM airlock_requests WHERE id = $1")
                    .bind(&request.id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(unavailable)?;

            return Err(if exists.is_some() {
                metrics::counter!("airlock_repository_conflicts_total").increment(1);
                RepositoryError::Conflict {
                    id: request.id.clone(),
                    expected: request.status,
                }
            } else {
                RepositoryError::NotFound(request.id.clone())
            });
        };

        sqlx::query(
            r"
            INSERT INTO airlock_request_history (
                request_id, previous_status, new_status, changed_by, changed_when
            ) VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&request.id)
        .bind(request.status.as_str())
        .bind(new_status.as_str())
        .bind(Json(user))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)?;

        tracing::debug!(
            request_id = %request.id,
            previous_status = request.status.as_str(),
            new_status = new_status.as_str(),
            "Airlock request status persisted"
        );
        row_to_request(&row)
    }
}

impl AirlockRequestRepository for PostgresAirlockRequestRepository {
    fn get_by_id<'a>(&'a self, request_id: &'a str) -> RepositoryFuture<'a, AirlockRequest> {
        Box::pin(self.fetch(request_id))
    }

    fn update_status<'a>(
        &'a self,
        request: &'a AirlockRequest,
        new_status: AirlockRequestStatus,
        user: &'a User,
    ) -> RepositoryFuture<'a, AirlockRequest> {
        Box::pin(self.apply_update(request, new_status, user))
    }
}

#[allow(clippy::needless_pass_by_value)] // Used as a map_err adapter
fn unavailable(error: sqlx::Error) -> RepositoryError {
    tracing::warn!(error = %error, "Airlock request database error");
    RepositoryError::Unavailable(error.to_string())
}

fn corrupt(column: &str, value: &str) -> RepositoryError {
    RepositoryError::Unavailable(format!("stored {column} '{value}' is not recognized"))
}

fn parse_status(column: &str, value: &str) -> Result<AirlockRequestStatus, RepositoryError> {
    AirlockRequestStatus::parse(value).ok_or_else(|| corrupt(column, value))
}

fn row_to_request(row: &PgRow) -> Result<AirlockRequest, RepositoryError> {
    let request_type: String = row.try_get("request_type").map_err(unavailable)?;
    let status: String = row.try_get("status").map_err(unavailable)?;
    let files: Json<Vec<AirlockFile>> = row.try_get("files").map_err(unavailable)?;
    let owner: Json<User> = row.try_get("owner").map_err(unavailable)?;
    let updated_by: Option<Json<User>> = row.try_get("updated_by").map_err(unavailable)?;

    Ok(AirlockRequest {
        id: row.try_get("id").map_err(unavailable)?,
        workspace_id: row.try_get("workspace_id").map_err(unavailable)?,
        request_type: AirlockRequestType::parse(&request_type)
            .ok_or_else(|| corrupt("request_type", &request_type))?,
        files: files.0,
        business_justification: row.try_get("business_justification").map_err(unavailable)?,
        status: parse_status("status", &status)?,
        user: owner.0,
        created_when: row.try_get("created_when").map_err(unavailable)?,
        updated_when: row.try_get("updated_when").map_err(unavailable)?,
        updated_by: updated_by.map(|user| user.0),
    })
}

fn row_to_history_item(row: &PgRow) -> Result<AirlockRequestHistoryItem, RepositoryError> {
    let previous_status: String = row.try_get("previous_status").map_err(unavailable)?;
    let new_status: String = row.try_get("new_status").map_err(unavailable)?;
    let changed_by: Json<User> = row.try_get("changed_by").map_err(unavailable)?;

    Ok(AirlockRequestHistoryItem {
        previous_status: parse_status("previous_status", &previous_status)?,
        new_status: parse_status("new_status", &new_status)?,
        changed_by: changed_by.0,
        changed_when: row.try_get("changed_when").map_err(unavailable)?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn unknown_stored_status_is_reported_as_unavailable() {
        let error = parse_status("status", "archived").unwrap_err();
        assert_eq!(
            error,
            RepositoryError::Unavailable("stored status 'archived' is not recognized".to_string())
        );
    }

    #[test]
    fn stored_status_uses_wire_form() {
        assert_eq!(
            parse_status("status", "in_review"),
            Ok(AirlockRequestStatus::InReview)
        );
        assert!(parse_status("status", "InReview").is_err());
    }

    #[test]
    fn default_pool_settings() {
        let settings = PoolSettings::default();
        assert_eq!(settings.max_connections, 5);
        assert_eq!(settings.connect_timeout, Duration::from_secs(5));
    }
}
