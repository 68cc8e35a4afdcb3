//! Retailer and consumer account rows.
//!
//! Rows are keyed by the auth platform's user id so a verified token maps
//! straight to its account without a lookup table.

use atelier_core::{ConsumerId, Email, RetailerId};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{RepositoryError, conflict_on_unique, subscriptions};
use crate::models::{Consumer, Retailer};

#[derive(sqlx::FromRow)]
struct RetailerRow {
    id: RetailerId,
    email: String,
    company_name: String,
    stripe_customer_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RetailerRow> for Retailer {
    type Error = RepositoryError;

    fn try_from(row: RetailerRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            email: parse_email(&row.email)?,
            company_name: row.company_name,
            stripe_customer_id: row.stripe_customer_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ConsumerRow {
    id: ConsumerId,
    email: String,
    display_name: Option<String>,
    avatar_path: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ConsumerRow> for Consumer {
    type Error = RepositoryError;

    fn try_from(row: ConsumerRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            email: parse_email(&row.email)?,
            display_name: row.display_name,
            avatar_path: row.avatar_path,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn parse_email(raw: &str) -> Result<Email, RepositoryError> {
    Email::parse(raw)
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid email in database: {e}")))
}

const RETAILER_COLUMNS: &str =
    "id, email, company_name, stripe_customer_id, created_at, updated_at";

/// Repository for retailer accounts.
pub struct RetailerRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> RetailerRepository<'a> {
    /// Create a new retailer repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Create a retailer together with its free-tier subscription.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the account already exists.
    /// Returns `RepositoryError::Database` for other database errors.
    pub async fn create(
        &self,
        id: RetailerId,
        email: &Email,
        company_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Retailer, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row: RetailerRow = sqlx::query_as(&format!(
            "INSERT INTO atelier.retailers (id, email, company_name)
             VALUES ($1, $2, $3)
             RETURNING {RETAILER_COLUMNS}"
        ))
        .bind(id)
        .bind(email.as_str())
        .bind(company_name)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, "retailer"))?;

        subscriptions::insert_free(&mut *tx, id, now).await?;
        tx.commit().await?;

        row.try_into()
    }

    /// Get a retailer by id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if the stored email is invalid.
    pub async fn get(&self, id: RetailerId) -> Result<Option<Retailer>, RepositoryError> {
        let row: Option<RetailerRow> = sqlx::query_as(&format!(
            "SELECT {RETAILER_COLUMNS} FROM atelier.retailers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(Retailer::try_from).transpose()
    }

    /// Find the retailer owning a payment provider customer.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_by_stripe_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<Retailer>, RepositoryError> {
        let row: Option<RetailerRow> = sqlx::query_as(&format!(
            "SELECT {RETAILER_COLUMNS} FROM atelier.retailers WHERE stripe_customer_id = $1"
        ))
        .bind(customer_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(Retailer::try_from).transpose()
    }

    /// Rename the company.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the retailer does not exist.
    pub async fn update_company_name(
        &self,
        id: RetailerId,
        company_name: &str,
    ) -> Result<Retailer, RepositoryError> {
        let row: Option<RetailerRow> = sqlx::query_as(&format!(
            "UPDATE atelier.retailers SET company_name = $2, updated_at = now()
             WHERE id = $1
             RETURNING {RETAILER_COLUMNS}"
        ))
        .bind(id)
        .bind(company_name)
        .fetch_optional(self.pool)
        .await?;

        row.ok_or(RepositoryError::NotFound)?.try_into()
    }

    /// Store the payment provider customer id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if another retailer already owns it.
    pub async fn set_stripe_customer(
        &self,
        id: RetailerId,
        customer_id: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE atelier.retailers SET stripe_customer_id = $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(customer_id)
        .execute(self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "customer"))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

const CONSUMER_COLUMNS: &str = "id, email, display_name, avatar_path, created_at, updated_at";

/// Repository for consumer accounts.
pub struct ConsumerRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> ConsumerRepository<'a> {
    /// Create a new consumer repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Create a consumer.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the account already exists.
    pub async fn create(
        &self,
        id: ConsumerId,
        email: &Email,
        display_name: Option<&str>,
    ) -> Result<Consumer, RepositoryError> {
        let row: ConsumerRow = sqlx::query_as(&format!(
            "INSERT INTO atelier.consumers (id, email, display_name)
             VALUES ($1, $2, $3)
             RETURNING {CONSUMER_COLUMNS}"
        ))
        .bind(id)
        .bind(email.as_str())
        .bind(display_name)
        .fetch_one(self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "consumer"))?;

        row.try_into()
    }

    /// Get a consumer by id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get(&self, id: ConsumerId) -> Result<Option<Consumer>, RepositoryError> {
        let row: Option<ConsumerRow> = sqlx::query_as(&format!(
            "SELECT {CONSUMER_COLUMNS} FROM atelier.consumers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(Consumer::try_from).transpose()
    }

    /// Update profile fields. `None` leaves a field unchanged, an empty
    /// string clears it.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the consumer does not exist.
    pub async fn update_profile(
        &self,
        id: ConsumerId,
        display_name: Option<&str>,
        avatar_path: Option<&str>,
    ) -> Result<Consumer, RepositoryError> {
        let row: Option<ConsumerRow> = sqlx::query_as(&format!(
            "UPDATE atelier.consumers SET
                 display_name = CASE WHEN $2::text IS NULL THEN display_name ELSE NULLIF($2, '') END,
                 avatar_path = CASE WHEN $3::text IS NULL THEN avatar_path ELSE NULLIF($3, '') END,
                 updated_at = now()
             WHERE id = $1
             RETURNING {CONSUMER_COLUMNS}"
        ))
        .bind(id)
        .bind(display_name)
        .bind(avatar_path)
        .fetch_optional(self.pool)
        .await?;

        row.ok_or(RepositoryError::NotFound)?.try_into()
    }
}
