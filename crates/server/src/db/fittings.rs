//! Fitting session rows.

use atelier_core::{
    BillingPeriod, ConsumerId, CreditSource, FittingId, FittingStatus, RetailerId, ShopId,
};
use sqlx::{PgConnection, PgPool};

use super::RepositoryError;
use crate::models::{FittingSession, FittingStats, NewFitting};

const COLUMNS: &str = "id, consumer_id, shop_id, retailer_id, status, credit_source, \
     garment_image_url, person_image_path, result_image_url, error, \
     created_at, updated_at, completed_at";

/// Largest page a list endpoint returns.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Filters for a retailer's fitting list.
#[derive(Debug, Clone, Default)]
pub struct FittingFilter {
    pub shop_id: Option<ShopId>,
    pub status: Option<FittingStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl FittingFilter {
    /// Clamp paging to sane bounds.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.limit = self.limit.clamp(1, MAX_PAGE_SIZE);
        self.offset = self.offset.max(0);
        self
    }
}

/// Insert a pending session, inside the transaction that paid for it.
pub(crate) async fn insert(
    conn: &mut PgConnection,
    fitting: &NewFitting,
    source: CreditSource,
) -> Result<FittingSession, RepositoryError> {
    let session: FittingSession = sqlx::query_as(&format!(
        "INSERT INTO atelier.fitting_sessions
             (id, consumer_id, shop_id, retailer_id, status, credit_source,
              garment_image_url, person_image_path)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING {COLUMNS}"
    ))
    .bind(fitting.id)
    .bind(fitting.consumer_id)
    .bind(fitting.shop_id)
    .bind(fitting.retailer_id)
    .bind(FittingStatus::Pending)
    .bind(source)
    .bind(&fitting.garment_image_url)
    .bind(&fitting.person_image_path)
    .fetch_one(&mut *conn)
    .await?;

    Ok(session)
}

/// Repository for fitting sessions.
pub struct FittingRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> FittingRepository<'a> {
    /// Create a new fitting repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get a session by id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get(&self, id: FittingId) -> Result<Option<FittingSession>, RepositoryError> {
        let session = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM atelier.fitting_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(session)
    }

    /// Whether any session still uses an uploaded person image.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn uses_person_image(&self, path: &str) -> Result<bool, RepositoryError> {
        let used: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM atelier.fitting_sessions WHERE person_image_path = $1)",
        )
        .bind(path)
        .fetch_one(self.pool)
        .await?;
        Ok(used)
    }

    /// A consumer's sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list_for_consumer(
        &self,
        consumer_id: ConsumerId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FittingSession>, RepositoryError> {
        let sessions = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM atelier.fitting_sessions
             WHERE consumer_id = $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3"
        ))
        .bind(consumer_id)
        .bind(limit.clamp(1, MAX_PAGE_SIZE))
        .bind(offset.max(0))
        .fetch_all(self.pool)
        .await?;

        Ok(sessions)
    }

    /// Sessions across a retailer's shops, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list_for_retailer(
        &self,
        retailer_id: RetailerId,
        filter: FittingFilter,
    ) -> Result<Vec<FittingSession>, RepositoryError> {
        let filter = filter.clamped();
        let sessions = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM atelier.fitting_sessions
             WHERE retailer_id = $1
               AND ($2::uuid IS NULL OR shop_id = $2)
               AND ($3::atelier.fitting_status IS NULL OR status = $3)
             ORDER BY created_at DESC
             LIMIT $4 OFFSET $5"
        ))
        .bind(retailer_id)
        .bind(filter.shop_id)
        .bind(filter.status)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(self.pool)
        .await?;

        Ok(sessions)
    }

    /// Move a session to `next` if it is still running.
    ///
    /// Returns `None` when the session does not exist, is already terminal,
    /// or already is in `next`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn transition(
        &self,
        id: FittingId,
        next: FittingStatus,
        result_image_url: Option<&str>,
        error: Option<&str>,
    ) -> Result<Option<FittingSession>, RepositoryError> {
        let session = sqlx::query_as(&format!(
            "UPDATE atelier.fitting_sessions SET
                 status = $2,
                 result_image_url = COALESCE($3, result_image_url),
                 error = COALESCE($4, error),
                 completed_at = CASE WHEN $5 THEN now() ELSE completed_at END,
                 updated_at = now()
             WHERE id = $1
               AND status IN ('pending', 'processing')
               AND status <> $2
             RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(next)
        .bind(result_image_url)
        .bind(error)
        .bind(next.is_terminal())
        .fetch_optional(self.pool)
        .await?;

        Ok(session)
    }

    /// Session counts created within a billing period.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn period_stats(
        &self,
        retailer_id: RetailerId,
        period: &BillingPeriod,
    ) -> Result<FittingStats, RepositoryError> {
        let stats = sqlx::query_as(
            "SELECT COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                    COUNT(*) FILTER (WHERE status = 'failed') AS failed
             FROM atelier.fitting_sessions
             WHERE retailer_id = $1 AND created_at >= $2 AND created_at < $3",
        )
        .bind(retailer_id)
        .bind(period.start)
        .bind(period.end)
        .fetch_one(self.pool)
        .await?;

        Ok(stats)
    }
}
