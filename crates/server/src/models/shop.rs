//! Retailer shops.

use atelier_core::{RetailerId, ShopId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A storefront that embeds the fitting widget.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Shop {
    pub id: ShopId,
    pub retailer_id: RetailerId,
    pub name: String,
    /// Public identifier used by the widget.
    pub slug: String,
    pub domain: Option<String>,
    /// Inactive shops refuse new fittings.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
