//! Integration tests for Atelier.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p atelier-integration-tests
//! ```
//!
//! Most suites need no database: the pool connects lazily and every
//! scenario is decided before a query runs. External services are
//! `wiremock` servers.
//!
//! `database_flows` runs against a real Postgres when
//! `ATELIER_TEST_DATABASE_URL` is set and passes trivially otherwise:
//!
//! ```bash
//! ATELIER_TEST_DATABASE_URL=postgres://localhost/atelier_test \
//!     cargo test -p atelier-integration-tests --test database_flows
//! ```
//!
//! # Test Categories
//!
//! - `billing_events` - signed payment events mapped to balance changes
//! - `api_access` - authentication, roles, and validation through the router
//! - `database_flows` - credit spending, refunds, and event idempotency

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::time::Duration;

use atelier_core::{Bundle, Plan, PriceCatalog};
use atelier_server::config::{AtelierConfig, StripeConfig, SupabaseConfig, WorkflowConfig};
use atelier_server::state::AppState;
use axum::Router;
use secrecy::SecretString;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Webhook signing secret used by [`config`].
pub const WEBHOOK_SECRET: &str = "whsec_integration_secret_value";

/// Workflow callback secret used by [`config`].
pub const WORKFLOW_SECRET: &str = "workflow_integration_secret";

/// Price ids registered in [`config`].
pub const STARTER_PRICE: &str = "price_starter_monthly";
pub const GROWTH_PRICE: &str = "price_growth_monthly";
pub const SMALL_BUNDLE_PRICE: &str = "price_bundle_small";

/// Database URL nothing listens on.
const UNREACHABLE_DATABASE: &str = "postgres://atelier@127.0.0.1:1/atelier";

/// Price catalog shared by the tests.
#[must_use]
pub fn catalog() -> PriceCatalog {
    PriceCatalog::new()
        .with_plan(Plan::Starter, STARTER_PRICE)
        .with_plan(Plan::Growth, GROWTH_PRICE)
        .with_bundle(Bundle::Small, SMALL_BUNDLE_PRICE)
}

/// Configuration pointing every external service at `upstream`.
#[must_use]
pub fn config(upstream: &str) -> AtelierConfig {
    AtelierConfig {
        database_url: SecretString::from(UNREACHABLE_DATABASE),
        host: std::net::IpAddr::from([127, 0, 0, 1]),
        port: 8080,
        base_url: "https://api.atelier.test".to_string(),
        dashboard_url: "https://app.atelier.test".to_string(),
        upload_max_bytes: 4096,
        supabase: SupabaseConfig {
            url: upstream.to_string(),
            anon_key: "anon-public-key".to_string(),
            service_role_key: SecretString::from("service-role-key"),
            storage_bucket: "uploads".to_string(),
        },
        stripe: StripeConfig {
            api_base: upstream.to_string(),
            secret_key: SecretString::from("sk_test_integration"),
            webhook_secret: SecretString::from(WEBHOOK_SECRET),
            webhook_tolerance_secs: 300,
            prices: catalog(),
        },
        workflow: WorkflowConfig {
            webhook_url: format!("{upstream}/webhook/fit"),
            secret: SecretString::from(WORKFLOW_SECRET),
        },
        sentry_dsn: None,
        sentry_environment: None,
        sentry_sample_rate: 1.0,
        sentry_traces_sample_rate: 0.0,
    }
}

/// Application state with a lazily connected pool.
///
/// # Panics
///
/// Panics if the state cannot be built, which only happens for a malformed
/// test configuration.
#[must_use]
pub fn state(upstream: &str) -> AppState {
    let pool = PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(200))
        .connect_lazy(UNREACHABLE_DATABASE)
        .expect("lazy pool");
    AppState::new(config(upstream), pool).expect("test state")
}

/// Environment variable naming the Postgres database for `database_flows`.
pub const DATABASE_ENV: &str = "ATELIER_TEST_DATABASE_URL";

/// Migrated pool for the test database, or `None` when none is configured.
///
/// # Panics
///
/// Panics if the configured database cannot be reached or migrated.
pub async fn database() -> Option<PgPool> {
    let url = std::env::var(DATABASE_ENV).ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to test database");
    sqlx::migrate!("../server/migrations")
        .run(&pool)
        .await
        .expect("migrate test database");
    Some(pool)
}

/// Application state backed by a real `pool`.
///
/// # Panics
///
/// Panics if the state cannot be built.
#[must_use]
pub fn state_with_pool(upstream: &str, pool: PgPool) -> AppState {
    AppState::new(config(upstream), pool).expect("test state")
}

/// Full router for `upstream`.
#[must_use]
pub fn app(upstream: &str) -> Router {
    atelier_server::routes::router(state(upstream))
}

/// Full router for `upstream` backed by a real `pool`.
#[must_use]
pub fn app_with_pool(upstream: &str, pool: PgPool) -> Router {
    atelier_server::routes::router(state_with_pool(upstream, pool))
}
