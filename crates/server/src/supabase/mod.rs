//! Clients for the hosted auth and storage platform.
//!
//! Authentication is delegated entirely: this service never sees password
//! hashes. [`AuthClient`] talks to the platform's `GoTrue` REST API with the
//! public anon key, [`StorageClient`] uses the service-role key to write
//! objects on behalf of users.

mod auth;
mod storage;

pub use auth::{AuthClient, AuthSession, SignUpOutcome, SupabaseUser};
pub use storage::{SignedUrl, StorageClient};

use thiserror::Error;

/// Errors that can occur when calling the hosted platform.
#[derive(Debug, Error)]
pub enum SupabaseError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Email/password, refresh token, or access token was not accepted.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The platform refused the request for a reason the user can fix.
    #[error("rejected: {0}")]
    Rejected(String),

    /// API returned an unexpected error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse response.
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Pull a human-readable message out of a platform error body.
///
/// The auth API has used `msg`, `error_description`, `message`, and `error`
/// across versions; storage uses `message`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["msg", "error_description", "message", "error"]
                .iter()
                .find_map(|key| value.get(*key)?.as_str().map(String::from))
        })
        .unwrap_or_else(|| body.to_string())
}
