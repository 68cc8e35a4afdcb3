//! Virtual fitting sessions.

use atelier_core::{ConsumerId, CreditSource, FittingId, FittingStatus, RetailerId, ShopId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A fitting job and its outcome.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FittingSession {
    pub id: FittingId,
    pub consumer_id: ConsumerId,
    pub shop_id: ShopId,
    pub retailer_id: RetailerId,
    pub status: FittingStatus,
    /// Pool the session was paid from; a refund goes back there.
    pub credit_source: CreditSource,
    pub garment_image_url: String,
    pub person_image_path: String,
    pub result_image_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields of a session about to be paid for.
#[derive(Debug, Clone)]
pub struct NewFitting {
    pub id: FittingId,
    pub consumer_id: ConsumerId,
    pub shop_id: ShopId,
    pub retailer_id: RetailerId,
    pub garment_image_url: String,
    pub person_image_path: String,
}

/// Session counts for a billing period.
#[derive(Debug, Clone, Copy, Default, Serialize, sqlx::FromRow)]
pub struct FittingStats {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
}
