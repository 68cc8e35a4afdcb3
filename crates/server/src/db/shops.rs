//! Shop rows.

use atelier_core::{RetailerId, ShopId};
use sqlx::PgPool;

use super::{RepositoryError, conflict_on_unique};
use crate::models::Shop;

const COLUMNS: &str = "id, retailer_id, name, slug, domain, is_active, created_at, updated_at";

/// Changes to a shop. `None` leaves a field unchanged; an empty `domain`
/// clears it.
#[derive(Debug, Clone, Default)]
pub struct ShopUpdate {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub is_active: Option<bool>,
}

/// Repository for shops.
pub struct ShopRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> ShopRepository<'a> {
    /// Create a new shop repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Create a shop.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the slug is taken.
    pub async fn create(
        &self,
        retailer_id: RetailerId,
        name: &str,
        slug: &str,
        domain: Option<&str>,
    ) -> Result<Shop, RepositoryError> {
        sqlx::query_as(&format!(
            "INSERT INTO atelier.shops (id, retailer_id, name, slug, domain)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {COLUMNS}"
        ))
        .bind(ShopId::random())
        .bind(retailer_id)
        .bind(name)
        .bind(slug)
        .bind(domain)
        .fetch_one(self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "shop slug"))
    }

    /// All shops owned by a retailer, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list_by_retailer(
        &self,
        retailer_id: RetailerId,
    ) -> Result<Vec<Shop>, RepositoryError> {
        let shops = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM atelier.shops WHERE retailer_id = $1 ORDER BY created_at"
        ))
        .bind(retailer_id)
        .fetch_all(self.pool)
        .await?;

        Ok(shops)
    }

    /// A shop, only if owned by `retailer_id`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_for_retailer(
        &self,
        id: ShopId,
        retailer_id: RetailerId,
    ) -> Result<Option<Shop>, RepositoryError> {
        let shop = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM atelier.shops WHERE id = $1 AND retailer_id = $2"
        ))
        .bind(id)
        .bind(retailer_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(shop)
    }

    /// An active shop by its public slug.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_active_by_slug(&self, slug: &str) -> Result<Option<Shop>, RepositoryError> {
        let shop = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM atelier.shops WHERE slug = $1 AND is_active"
        ))
        .bind(slug)
        .fetch_optional(self.pool)
        .await?;

        Ok(shop)
    }

    /// Update a shop owned by `retailer_id`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no such shop is owned by the retailer.
    pub async fn update(
        &self,
        id: ShopId,
        retailer_id: RetailerId,
        changes: &ShopUpdate,
    ) -> Result<Shop, RepositoryError> {
        let shop: Option<Shop> = sqlx::query_as(&format!(
            "UPDATE atelier.shops SET
                 name = COALESCE($3, name),
                 domain = CASE WHEN $4::text IS NULL THEN domain ELSE NULLIF($4, '') END,
                 is_active = COALESCE($5, is_active),
                 updated_at = now()
             WHERE id = $1 AND retailer_id = $2
             RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(retailer_id)
        .bind(changes.name.as_deref())
        .bind(changes.domain.as_deref())
        .bind(changes.is_active)
        .fetch_optional(self.pool)
        .await?;

        shop.ok_or(RepositoryError::NotFound)
    }

    /// Delete a shop owned by `retailer_id`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no such shop is owned by the retailer.
    pub async fn delete(&self, id: ShopId, retailer_id: RetailerId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM atelier.shops WHERE id = $1 AND retailer_id = $2")
            .bind(id)
            .bind(retailer_id)
            .execute(self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    /// Number of shops a retailer owns.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn count_by_retailer(&self, retailer_id: RetailerId) -> Result<i64, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM atelier.shops WHERE retailer_id = $1")
                .bind(retailer_id)
                .fetch_one(self.pool)
                .await?;

        Ok(count)
    }
}
