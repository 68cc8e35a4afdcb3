//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use sqlx::PgPool;

use crate::config::AtelierConfig;
use crate::middleware::auth::AuthUser;
use crate::stripe::{StripeClient, StripeError};
use crate::supabase::{AuthClient, StorageClient, SupabaseError};
use crate::workflow::{WorkflowClient, WorkflowError};

/// How long a verified access token is trusted without asking the platform again.
const TOKEN_CACHE_TTL: Duration = Duration::from_secs(60);
const TOKEN_CACHE_CAPACITY: u64 = 10_000;

/// Error building one of the external clients.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("supabase client: {0}")]
    Supabase(#[from] SupabaseError),
    #[error("stripe client: {0}")]
    Stripe(#[from] StripeError),
    #[error("workflow client: {0}")]
    Workflow(#[from] WorkflowError),
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like database connections and external clients.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: AtelierConfig,
    pool: PgPool,
    auth: AuthClient,
    storage: StorageClient,
    stripe: StripeClient,
    workflow: WorkflowClient,
    token_cache: Cache<String, AuthUser>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `config` - Server configuration
    /// * `pool` - `PostgreSQL` connection pool
    ///
    /// # Errors
    ///
    /// Returns an error if any external client cannot be built.
    pub fn new(config: AtelierConfig, pool: PgPool) -> Result<Self, StateError> {
        let auth = AuthClient::new(&config.supabase)?;
        let storage = StorageClient::new(&config.supabase)?;
        let stripe = StripeClient::new(&config.stripe)?;
        let workflow = WorkflowClient::new(&config.workflow)?;

        let token_cache = Cache::builder()
            .max_capacity(TOKEN_CACHE_CAPACITY)
            .time_to_live(TOKEN_CACHE_TTL)
            .build();

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                auth,
                storage,
                stripe,
                workflow,
                token_cache,
            }),
        })
    }

    /// Get a reference to the server configuration.
    #[must_use]
    pub fn config(&self) -> &AtelierConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Get a reference to the hosted auth client.
    #[must_use]
    pub fn auth(&self) -> &AuthClient {
        &self.inner.auth
    }

    /// Get a reference to the hosted storage client.
    #[must_use]
    pub fn storage(&self) -> &StorageClient {
        &self.inner.storage
    }

    /// Get a reference to the payments client.
    #[must_use]
    pub fn stripe(&self) -> &StripeClient {
        &self.inner.stripe
    }

    /// Get a reference to the workflow engine client.
    #[must_use]
    pub fn workflow(&self) -> &WorkflowClient {
        &self.inner.workflow
    }

    /// Verified access tokens, keyed by token digest.
    #[must_use]
    pub fn token_cache(&self) -> &Cache<String, AuthUser> {
        &self.inner.token_cache
    }
}
