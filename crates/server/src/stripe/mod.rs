//! Payments provider integration.
//!
//! - [`client`] - Customers, checkout sessions, and billing portal
//! - [`webhook`] - Signature verification for inbound events
//! - [`types`] - Event payloads and their mapping to domain values

pub mod client;
pub mod types;
pub mod webhook;

pub use client::{CheckoutUrls, StripeClient};
pub use types::{Event, EventObject, PayloadError, subscription_update};
pub use webhook::{SignatureError, compute_signature, verify_signature};

use thiserror::Error;

/// Errors that can occur when calling the payments API.
#[derive(Debug, Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse response.
    #[error("Parse error: {0}")]
    Parse(String),
}
