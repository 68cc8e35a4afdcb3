//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.
//! Every error response is JSON: `{"error": "<message>"}`.

use atelier_core::CreditError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::db::{ConsumeError, RepositoryError};
use crate::stripe::StripeError;
use crate::supabase::SupabaseError;
use crate::workflow::WorkflowError;

/// Application-level error type for the API.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Auth or storage platform call failed.
    #[error("Supabase error: {0}")]
    Supabase(#[from] SupabaseError),

    /// Payments API call failed.
    #[error("Stripe error: {0}")]
    Stripe(#[from] StripeError),

    /// Workflow engine refused or did not answer.
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// The retailer has no spendable sessions.
    #[error("Credit error: {0}")]
    Credit(#[from] CreditError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// User is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// User is authenticated but not allowed.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The request clashes with the current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request body exceeds the accepted size.
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Rate limited.
    #[error("Rate limited")]
    RateLimited,

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ConsumeError> for AppError {
    fn from(err: ConsumeError) -> Self {
        match err {
            ConsumeError::Credit(e) => Self::Credit(e),
            ConsumeError::Repository(e) => Self::Database(e),
        }
    }
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Database(err) => match err {
                RepositoryError::NotFound => StatusCode::NOT_FOUND,
                RepositoryError::Conflict(_) => StatusCode::CONFLICT,
                RepositoryError::Database(_) | RepositoryError::DataCorruption(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Supabase(err) => match err {
                SupabaseError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                SupabaseError::Rejected(_) => StatusCode::BAD_REQUEST,
                SupabaseError::Http(_) | SupabaseError::Api { .. } | SupabaseError::Parse(_) => {
                    StatusCode::BAD_GATEWAY
                }
            },
            Self::Stripe(_) | Self::Workflow(_) => StatusCode::BAD_GATEWAY,
            Self::Credit(_) => StatusCode::PAYMENT_REQUIRED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show the client.
    fn public_message(&self) -> String {
        match self {
            Self::Database(err) => match err {
                RepositoryError::NotFound => "Not found".to_string(),
                RepositoryError::Conflict(msg) => msg.clone(),
                _ => "Internal server error".to_string(),
            },
            Self::Supabase(err) => match err {
                SupabaseError::InvalidCredentials => "Invalid credentials".to_string(),
                SupabaseError::Rejected(msg) => msg.clone(),
                _ => "External service error".to_string(),
            },
            Self::Stripe(_) | Self::Workflow(_) => "External service error".to_string(),
            Self::Credit(err) => err.to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
            Self::NotFound(msg)
            | Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::BadRequest(msg)
            | Self::Conflict(msg)
            | Self::PayloadTooLarge(msg) => msg.clone(),
            Self::RateLimited => "Too many requests".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let body = serde_json::json!({ "error": self.public_message() });
        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use atelier_core::SubscriptionStatus;
    use axum::body::to_bytes;

    use super::*;

    async fn body_of(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("shop".to_string());
        assert_eq!(err.to_string(), "Not found: shop");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(AppError::NotFound(String::new()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Unauthorized(String::new()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden(String::new()).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::BadRequest(String::new()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            AppError::Credit(CreditError::Exhausted).status(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            AppError::Credit(CreditError::SubscriptionInactive(SubscriptionStatus::Unpaid)).status(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            AppError::Database(RepositoryError::Conflict("slug".to_string())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Database(RepositoryError::NotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Supabase(SupabaseError::InvalidCredentials).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Workflow(WorkflowError::Rejected {
                status: 500,
                message: String::new()
            })
            .status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let (status, body) = body_of(AppError::Database(RepositoryError::DataCorruption(
            "bad email row 42".to_string(),
        )))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");

        let (status, body) = body_of(AppError::Stripe(StripeError::Api {
            status: 401,
            message: "Invalid API Key provided: sk_live_***".to_string(),
        }))
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "External service error");
    }

    #[tokio::test]
    async fn test_client_errors_keep_message() {
        let (status, body) =
            body_of(AppError::Supabase(SupabaseError::Rejected("User already registered".to_string())))
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "User already registered");

        let (_, body) = body_of(AppError::Credit(CreditError::Exhausted)).await;
        assert_eq!(body["error"], "no fitting sessions remaining");
    }

    #[test]
    fn test_consume_error_conversion() {
        let err: AppError = ConsumeError::Credit(CreditError::Exhausted).into();
        assert!(matches!(err, AppError::Credit(CreditError::Exhausted)));

        let err: AppError = ConsumeError::Repository(RepositoryError::NotFound).into();
        assert!(matches!(err, AppError::Database(RepositoryError::NotFound)));
    }
}
