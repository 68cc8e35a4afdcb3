//! Idempotency for payment provider webhooks.
//!
//! The provider delivers at least once. An event that changes balances is
//! recorded inside the same transaction as the change, so an event id is
//! never marked seen without its effect. Events without balance effects are
//! recorded after they were handled; handling them twice is harmless.

use sqlx::{PgExecutor, PgPool};

use super::RepositoryError;

/// A delivered provider event, identified for the idempotency table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventReceipt<'a> {
    pub id: &'a str,
    pub event_type: &'a str,
}

/// Whether an event id was processed before.
///
/// # Errors
///
/// Returns error if the query fails.
pub async fn is_recorded(pool: &PgPool, event_id: &str) -> Result<bool, RepositoryError> {
    let recorded: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM atelier.stripe_events WHERE id = $1)")
            .bind(event_id)
            .fetch_one(pool)
            .await?;
    Ok(recorded)
}

/// Record an event id. Returns `false` if it was already recorded.
///
/// # Errors
///
/// Returns error if the database insert fails.
pub async fn record<'e, E>(executor: E, receipt: EventReceipt<'_>) -> Result<bool, RepositoryError>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "INSERT INTO atelier.stripe_events (id, event_type) VALUES ($1, $2)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(receipt.id)
    .bind(receipt.event_type)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}
