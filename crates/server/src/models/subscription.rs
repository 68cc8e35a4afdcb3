//! Stored subscription state.

use atelier_core::{RetailerId, SubscriptionState, SubscriptionStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A retailer's subscription row.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub retailer_id: RetailerId,
    /// Payment provider subscription, absent on the free tier.
    #[serde(skip_serializing)]
    pub stripe_subscription_id: Option<String>,
    #[serde(flatten)]
    pub state: SubscriptionState,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether a snapshot of provider subscription `id` may change this record.
    ///
    /// A record tracks at most one provider subscription. Another one takes
    /// over only once the tracked one stopped granting sessions and the new
    /// one grants them.
    #[must_use]
    pub fn accepts_snapshot(&self, id: &str, incoming: SubscriptionStatus) -> bool {
        match self.stripe_subscription_id.as_deref() {
            None => true,
            Some(current) if current == id => true,
            Some(_) => {
                !self.state.status.grants_included_sessions()
                    && incoming.grants_included_sessions()
            }
        }
    }

    /// Whether `id` is the tracked provider subscription.
    #[must_use]
    pub fn tracks(&self, id: &str) -> bool {
        self.stripe_subscription_id.as_deref() == Some(id)
    }
}
