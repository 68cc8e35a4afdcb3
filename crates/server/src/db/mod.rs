//! Database operations for the hosted `PostgreSQL` database.
//!
//! # Schema: `atelier`
//!
//! The auth platform owns credentials; these tables hold everything else:
//!
//! ## Tables
//!
//! - `retailers` - Merchant accounts, keyed by auth user id
//! - `consumers` - Shopper accounts, keyed by auth user id
//! - `shops` - Storefronts that embed the fitting widget
//! - `subscriptions` - Plan, status, period, and session balances per retailer
//! - `credit_ledger` - Append-only record of balance changes
//! - `fitting_sessions` - Virtual fitting jobs and their results
//! - `stripe_events` - Processed payment provider event ids
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p atelier-cli -- migrate
//! ```

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub mod accounts;
pub mod fittings;
pub mod shops;
pub mod stripe_events;
pub mod subscriptions;

pub use accounts::{ConsumerRepository, RetailerRepository};
pub use fittings::{FittingFilter, FittingRepository};
pub use shops::{ShopRepository, ShopUpdate};
pub use stripe_events::EventReceipt;
pub use subscriptions::{ConsumeError, EventEffect, SubscriptionRepository};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate slug).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Map a unique violation to `Conflict`, everything else to `Database`.
fn conflict_on_unique(e: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(format!("{what} already exists"));
    }
    RepositoryError::Database(e)
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
