//! Account signup, login, and session management.
//!
//! Credentials never touch our database: the auth platform owns passwords
//! and tokens. Signup additionally creates the local account row keyed by
//! the platform user id.

use atelier_core::{ConsumerId, Email, RetailerId, Role, UserId};
use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::db::{ConsumerRepository, RetailerRepository};
use crate::error::{AppError, Result};
use crate::middleware::auth::token_digest;
use crate::middleware::{AuthUser, BearerToken, RequireUser};
use crate::state::AppState;
use crate::supabase::{AuthSession, SignUpOutcome, SupabaseError};

/// Shortest password accepted at signup.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Longest company or display name accepted.
pub const MAX_NAME_LENGTH: usize = 120;

// =============================================================================
// Request / Response Types
// =============================================================================

/// Consumer signup form.
#[derive(Debug, Deserialize)]
pub struct ConsumerSignupRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Retailer signup form.
#[derive(Debug, Deserialize)]
pub struct RetailerSignupRequest {
    pub email: String,
    pub password: String,
    pub company_name: String,
}

/// Signup result.
///
/// `session` is absent while the platform waits for email confirmation.
#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub user_id: UserId,
    pub role: Role,
    pub confirmation_required: bool,
    pub session: Option<TokenResponse>,
}

/// Email and password login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Token refresh.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Password recovery.
#[derive(Debug, Deserialize)]
pub struct RecoverRequest {
    pub email: String,
}

/// Issued tokens plus the account's role.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user_id: UserId,
    pub role: Option<Role>,
}

impl From<AuthSession> for TokenResponse {
    fn from(session: AuthSession) -> Self {
        let role = session.user.role();
        Self {
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            token_type: session.token_type,
            expires_in: session.expires_in,
            user_id: session.user.id,
            role,
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_credentials(email: &str, password: &str) -> Result<Email> {
    let email = Email::parse(email).map_err(|e| AppError::BadRequest(e.to_string()))?;
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(email)
}

/// Trim a name and enforce its length. Empty names become `None`.
pub(crate) fn clean_name(raw: &str, field: &str) -> Result<Option<String>> {
    let name = raw.trim();
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(AppError::BadRequest(format!(
            "{field} must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok((!name.is_empty()).then(|| name.to_string()))
}

fn signup_response(outcome: SignUpOutcome, role: Role) -> SignupResponse {
    SignupResponse {
        user_id: outcome.user.id,
        role,
        confirmation_required: outcome.session.is_none(),
        session: outcome.session.map(TokenResponse::from),
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Register a consumer.
///
/// POST /api/auth/consumers/signup
///
/// # Errors
///
/// Returns 400 for invalid input or an address the platform refuses.
pub async fn consumer_signup(
    State(state): State<AppState>,
    Json(form): Json<ConsumerSignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>)> {
    let email = validate_credentials(&form.email, &form.password)?;
    let display_name = match form.display_name.as_deref() {
        Some(name) => clean_name(name, "display_name")?,
        None => None,
    };

    let outcome = state
        .auth()
        .sign_up(&email, &form.password, Role::Consumer)
        .await?;

    let consumer_id = ConsumerId::from(outcome.user.id);
    if let Err(e) = ConsumerRepository::new(state.pool())
        .create(consumer_id, &email, display_name.as_deref())
        .await
    {
        error!(user_id = %outcome.user.id, error = %e, "Failed to create consumer row after signup");
        return Err(AppError::Internal(format!("consumer row: {e}")));
    }

    info!(consumer_id = %consumer_id, "Consumer signed up");
    Ok((
        StatusCode::CREATED,
        Json(signup_response(outcome, Role::Consumer)),
    ))
}

/// Register a retailer on the free plan.
///
/// POST /api/auth/retailers/signup
///
/// # Errors
///
/// Returns 400 for invalid input or an address the platform refuses.
pub async fn retailer_signup(
    State(state): State<AppState>,
    Json(form): Json<RetailerSignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>)> {
    let email = validate_credentials(&form.email, &form.password)?;
    let company_name = clean_name(&form.company_name, "company_name")?
        .ok_or_else(|| AppError::BadRequest("company_name is required".to_string()))?;

    let outcome = state
        .auth()
        .sign_up(&email, &form.password, Role::Retailer)
        .await?;

    let retailer_id = RetailerId::from(outcome.user.id);
    if let Err(e) = RetailerRepository::new(state.pool())
        .create(retailer_id, &email, &company_name, Utc::now())
        .await
    {
        error!(user_id = %outcome.user.id, error = %e, "Failed to create retailer row after signup");
        return Err(AppError::Internal(format!("retailer row: {e}")));
    }

    info!(retailer_id = %retailer_id, "Retailer signed up");
    Ok((
        StatusCode::CREATED,
        Json(signup_response(outcome, Role::Retailer)),
    ))
}

/// Password login.
///
/// POST /api/auth/login
///
/// # Errors
///
/// Returns 401 for wrong credentials.
pub async fn login(
    State(state): State<AppState>,
    Json(form): Json<LoginRequest>,
) -> Result<Json<TokenResponse>> {
    let email = Email::parse(&form.email)
        .map_err(|_| AppError::Supabase(SupabaseError::InvalidCredentials))?;

    let session = state.auth().sign_in(&email, &form.password).await?;
    info!(user_id = %session.user.id, "User logged in");
    Ok(Json(session.into()))
}

/// Exchange a refresh token.
///
/// POST /api/auth/refresh
///
/// # Errors
///
/// Returns 401 if the refresh token is invalid or revoked.
pub async fn refresh(
    State(state): State<AppState>,
    Json(form): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>> {
    if form.refresh_token.trim().is_empty() {
        return Err(AppError::BadRequest("refresh_token is required".to_string()));
    }
    let session = state.auth().refresh(&form.refresh_token).await?;
    Ok(Json(session.into()))
}

/// Revoke the presented session.
///
/// POST /api/auth/logout
///
/// # Errors
///
/// Returns 401 without a bearer token.
pub async fn logout(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Result<StatusCode> {
    state.token_cache().invalidate(&token_digest(&token)).await;

    match state.auth().sign_out(&token).await {
        // An already-expired token is as logged out as it gets.
        Ok(()) | Err(SupabaseError::InvalidCredentials) => Ok(StatusCode::NO_CONTENT),
        Err(e) => Err(e.into()),
    }
}

/// Send a password recovery email.
///
/// POST /api/auth/recover
///
/// Always answers 202 for a well-formed address so the endpoint cannot be
/// used to probe which emails have accounts.
///
/// # Errors
///
/// Returns 400 for a malformed address, 502 if the platform is unreachable.
pub async fn recover(
    State(state): State<AppState>,
    Json(form): Json<RecoverRequest>,
) -> Result<StatusCode> {
    let email = Email::parse(&form.email).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let redirect = state.config().dashboard_url.clone();

    match state.auth().recover(&email, Some(&redirect)).await {
        Ok(()) | Err(SupabaseError::Rejected(_)) => Ok(StatusCode::ACCEPTED),
        Err(e) => Err(e.into()),
    }
}

/// The authenticated user.
///
/// GET /api/auth/me
pub async fn me(RequireUser(user): RequireUser) -> Json<AuthUser> {
    Json(user)
}
