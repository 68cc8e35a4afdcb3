//! Bearer-token authentication extractors.
//!
//! Access tokens are issued by the hosted auth platform. They are verified
//! by asking the platform who they belong to; answers are cached briefly so
//! a burst of dashboard requests costs one round trip.

use atelier_core::{ConsumerId, RetailerId, Role, UserId};
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{AppError, set_sentry_user};
use crate::state::AppState;
use crate::supabase::SupabaseError;

/// The caller behind a verified access token.
#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub id: UserId,
    pub email: Option<String>,
    pub role: Role,
}

/// Raw bearer token from the `Authorization` header.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Extractor that requires a valid access token of any role.
///
/// # Example
///
/// ```rust,ignore
/// async fn me(RequireUser(user): RequireUser) -> Json<AuthUser> {
///     Json(user)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireUser(pub AuthUser);

/// Extractor that requires a retailer account.
#[derive(Debug, Clone)]
pub struct RequireRetailer(pub AuthUser);

/// Extractor that requires a consumer account.
#[derive(Debug, Clone)]
pub struct RequireConsumer(pub AuthUser);

impl RequireRetailer {
    /// The retailer row id.
    #[must_use]
    pub fn id(&self) -> RetailerId {
        self.0.id.into()
    }
}

impl RequireConsumer {
    /// The consumer row id.
    #[must_use]
    pub fn id(&self) -> ConsumerId {
        self.0.id.into()
    }
}

/// Pull the token out of `Authorization: Bearer <token>`.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Cache key for a token; raw tokens are never kept in memory longer than a request.
#[must_use]
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Resolve a token to its user, through the cache.
///
/// # Errors
///
/// Returns `Unauthorized` for rejected tokens, `Forbidden` for accounts
/// without a role, and a 502 when the platform cannot be reached.
pub async fn resolve_user(state: &AppState, token: &str) -> Result<AuthUser, AppError> {
    let key = token_digest(token);
    if let Some(user) = state.token_cache().get(&key).await {
        return Ok(user);
    }

    let remote = state.auth().get_user(token).await.map_err(|e| match e {
        SupabaseError::InvalidCredentials => {
            AppError::Unauthorized("Invalid or expired token".to_string())
        }
        other => AppError::Supabase(other),
    })?;

    let role = remote
        .role()
        .ok_or_else(|| AppError::Forbidden("Account has no role".to_string()))?;

    let user = AuthUser {
        id: remote.id,
        email: remote.email,
        role,
    };
    state.token_cache().insert(key, user.clone()).await;
    Ok(user)
}

impl FromRequestParts<AppState> for BearerToken {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &AppState) -> Result<Self, Self::Rejection> {
        bearer_token(&parts.headers)
            .map(|token| Self(token.to_string()))
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))
    }
}

impl FromRequestParts<AppState> for RequireUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        let user = resolve_user(state, &token).await?;

        set_sentry_user(&user.id, user.email.as_deref());
        tracing::Span::current().record("user_id", tracing::field::display(user.id));

        Ok(Self(user))
    }
}

impl FromRequestParts<AppState> for RequireRetailer {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let RequireUser(user) = RequireUser::from_request_parts(parts, state).await?;
        if user.role != Role::Retailer {
            return Err(AppError::Forbidden("Retailer account required".to_string()));
        }
        Ok(Self(user))
    }
}

impl FromRequestParts<AppState> for RequireConsumer {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let RequireUser(user) = RequireUser::from_request_parts(parts, state).await?;
        if user.role != Role::Consumer {
            return Err(AppError::Forbidden("Consumer account required".to_string()));
        }
        Ok(Self(user))
    }
}
