//! Consumer and retailer accounts.

use atelier_core::{ConsumerId, Email, RetailerId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A merchant account.
#[derive(Debug, Clone, Serialize)]
pub struct Retailer {
    pub id: RetailerId,
    pub email: Email,
    pub company_name: String,
    /// Payment provider customer, created on first checkout.
    #[serde(skip_serializing)]
    pub stripe_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A shopper account.
#[derive(Debug, Clone, Serialize)]
pub struct Consumer {
    pub id: ConsumerId,
    pub email: Email,
    pub display_name: Option<String>,
    /// Storage path of the avatar image.
    pub avatar_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
