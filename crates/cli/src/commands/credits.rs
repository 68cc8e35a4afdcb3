//! Operator credit grants.
//!
//! Granted sessions go to the bundle pool: they survive period rollovers
//! and plan changes, like purchased bundles.

use atelier_core::{ChangeReason, RetailerId};
use atelier_server::db::{RepositoryError, SubscriptionRepository};
use secrecy::ExposeSecret;
use sqlx::PgPool;

use super::{CommandError, database_url};

/// Ledger reference for a grant.
fn grant_reference(reason: &str) -> String {
    let reason = reason.trim();
    if reason.is_empty() {
        "cli".to_string()
    } else {
        format!("cli: {reason}")
    }
}

/// Add `sessions` bundle sessions to a retailer.
///
/// # Errors
///
/// Returns error if the retailer has no subscription or the database fails.
pub async fn grant(retailer_id: RetailerId, sessions: u32, reason: &str) -> Result<(), CommandError> {
    let database_url = database_url()?;
    let pool = PgPool::connect(database_url.expose_secret()).await?;

    let change = SubscriptionRepository::new(&pool)
        .add_bundle(
            retailer_id,
            sessions,
            ChangeReason::Grant,
            &grant_reference(reason),
        )
        .await
        .map_err(|e| match e {
            RepositoryError::NotFound => {
                tracing::error!(retailer_id = %retailer_id, "Retailer has no subscription");
                CommandError::Repository(RepositoryError::NotFound)
            }
            other => CommandError::Repository(other),
        })?;

    tracing::info!(
        retailer_id = %retailer_id,
        bundle_delta = change.bundle_delta,
        "Sessions granted"
    );
    Ok(())
}
