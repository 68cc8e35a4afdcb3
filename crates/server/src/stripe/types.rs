//! Webhook event payloads.
//!
//! Only the fields the billing flow reads are modelled; everything else in
//! the provider's objects is ignored by serde.

use std::collections::HashMap;

use atelier_core::{BillingPeriod, PriceCatalog, SubscriptionStatus, SubscriptionUpdate};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Why an event payload could not be mapped to domain values.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid event payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("subscription {0} has no items")]
    NoItems(String),
    #[error("unknown price id: {0}")]
    UnknownPrice(String),
    #[error("subscription {0} has no billing period")]
    MissingPeriod(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// Envelope of every webhook delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// The events the billing flow acts on.
#[derive(Debug, Clone)]
pub enum EventObject {
    CheckoutCompleted(CheckoutSession),
    SubscriptionChanged(Subscription),
    SubscriptionDeleted(Subscription),
    InvoicePaymentFailed(Invoice),
    Ignored,
}

impl Event {
    /// Parse the raw request body.
    ///
    /// # Errors
    ///
    /// Returns error if the body is not an event envelope.
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Decode `data.object` according to the event type.
    ///
    /// # Errors
    ///
    /// Returns error if the object does not match the expected shape.
    pub fn object(&self) -> Result<EventObject, PayloadError> {
        let object = self.data.object.clone();
        Ok(match self.event_type.as_str() {
            "checkout.session.completed" => {
                EventObject::CheckoutCompleted(serde_json::from_value(object)?)
            }
            "customer.subscription.created" | "customer.subscription.updated" => {
                EventObject::SubscriptionChanged(serde_json::from_value(object)?)
            }
            "customer.subscription.deleted" => {
                EventObject::SubscriptionDeleted(serde_json::from_value(object)?)
            }
            "invoice.payment_failed" => {
                EventObject::InvoicePaymentFailed(serde_json::from_value(object)?)
            }
            _ => EventObject::Ignored,
        })
    }
}

/// A completed checkout session.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub mode: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    /// Whether the money for a one-off purchase has arrived.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }

    /// Retailer that started the checkout, from metadata or the client reference.
    #[must_use]
    pub fn retailer_reference(&self) -> Option<&str> {
        self.metadata
            .get("retailer_id")
            .map(String::as_str)
            .or(self.client_reference_id.as_deref())
    }
}

/// A provider subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub customer: String,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    pub items: List<SubscriptionItem>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Subscription {
    /// Retailer recorded on the subscription when checkout created it.
    #[must_use]
    pub fn retailer_reference(&self) -> Option<&str> {
        self.metadata.get("retailer_id").map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct List<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub price: PriceRef,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceRef {
    pub id: String,
}

/// An invoice; only the customer and subscription matter here.
#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    parent: Option<InvoiceParent>,
}

#[derive(Debug, Clone, Deserialize)]
struct InvoiceParent {
    #[serde(default)]
    subscription_details: Option<InvoiceSubscriptionDetails>,
}

#[derive(Debug, Clone, Deserialize)]
struct InvoiceSubscriptionDetails {
    subscription: String,
}

impl Invoice {
    /// Subscription the invoice bills, absent for one-off invoices.
    ///
    /// Newer API versions nest it under `parent.subscription_details`.
    #[must_use]
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription.as_deref().or_else(|| {
            self.parent
                .as_ref()?
                .subscription_details
                .as_ref()
                .map(|details| details.subscription.as_str())
        })
    }
}

/// Map a provider subscription to a domain snapshot.
///
/// Newer API versions moved the period onto each item, so the top-level
/// fields win and the first item is the fallback.
///
/// # Errors
///
/// Returns error if the subscription has no items, its price is not in the
/// catalog or is not a plan, or no period can be found.
pub fn subscription_update(
    subscription: &Subscription,
    catalog: &PriceCatalog,
) -> Result<SubscriptionUpdate, PayloadError> {
    let item = subscription
        .items
        .data
        .first()
        .ok_or_else(|| PayloadError::NoItems(subscription.id.clone()))?;

    let plan = catalog
        .plan_for_price(&item.price.id)
        .ok_or_else(|| PayloadError::UnknownPrice(item.price.id.clone()))?;

    let start = subscription
        .current_period_start
        .or(item.current_period_start)
        .ok_or_else(|| PayloadError::MissingPeriod(subscription.id.clone()))?;
    let end = subscription
        .current_period_end
        .or(item.current_period_end)
        .ok_or_else(|| PayloadError::MissingPeriod(subscription.id.clone()))?;

    Ok(SubscriptionUpdate {
        plan,
        status: subscription.status,
        period: BillingPeriod::new(timestamp(start)?, timestamp(end)?),
        cancel_at_period_end: subscription.cancel_at_period_end,
    })
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, PayloadError> {
    DateTime::from_timestamp(secs, 0).ok_or(PayloadError::InvalidTimestamp(secs))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use atelier_core::Plan;

    use super::*;

    fn catalog() -> PriceCatalog {
        PriceCatalog::new()
            .with_plan(Plan::Growth, "price_growth")
            .with_bundle(atelier_core::Bundle::Small, "price_small")
    }

    #[test]
    fn test_invoice_subscription_id() {
        let legacy: Invoice = serde_json::from_value(serde_json::json!({
            "id": "in_1", "customer": "cus_1", "subscription": "sub_1"
        }))
        .unwrap();
        assert_eq!(legacy.subscription_id(), Some("sub_1"));

        let nested: Invoice = serde_json::from_value(serde_json::json!({
            "id": "in_2",
            "customer": "cus_1",
            "parent": { "subscription_details": { "subscription": "sub_2" } }
        }))
        .unwrap();
        assert_eq!(nested.subscription_id(), Some("sub_2"));

        let one_off: Invoice =
            serde_json::from_value(serde_json::json!({ "id": "in_3", "customer": "cus_1" })).unwrap();
        assert_eq!(one_off.subscription_id(), None);
    }

    fn subscription(value: serde_json::Value) -> Subscription {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_checkout_event() {
        let body = serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "created": 1_735_689_600,
            "data": { "object": {
                "id": "cs_1",
                "object": "checkout.session",
                "mode": "payment",
                "customer": "cus_1",
                "payment_status": "paid",
                "metadata": { "retailer_id": "r-1", "bundle": "small" }
            }}
        });

        let event = Event::parse(body.to_string().as_bytes()).unwrap();
        let EventObject::CheckoutCompleted(session) = event.object().unwrap() else {
            panic!("expected checkout");
        };
        assert!(session.is_paid());
        assert_eq!(session.retailer_reference(), Some("r-1"));
        assert_eq!(session.metadata.get("bundle").map(String::as_str), Some("small"));
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        let body = br#"{"id":"evt_2","type":"charge.refunded","created":1,"data":{"object":{"id":"ch_1"}}}"#;
        let event = Event::parse(body).unwrap();
        assert!(matches!(event.object().unwrap(), EventObject::Ignored));
    }

    #[test]
    fn test_subscription_update_top_level_period() {
        let sub = subscription(serde_json::json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "past_due",
            "cancel_at_period_end": true,
            "current_period_start": 1_735_689_600,
            "current_period_end": 1_738_368_000,
            "items": { "data": [ { "price": { "id": "price_growth" } } ] }
        }));

        let update = subscription_update(&sub, &catalog()).unwrap();
        assert_eq!(update.plan, Plan::Growth);
        assert_eq!(update.status, SubscriptionStatus::PastDue);
        assert!(update.cancel_at_period_end);
        assert_eq!(update.period.start.timestamp(), 1_735_689_600);
        assert_eq!(update.period.end.timestamp(), 1_738_368_000);
    }

    #[test]
    fn test_subscription_update_item_period_fallback() {
        let sub = subscription(serde_json::json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "active",
            "items": { "data": [ {
                "price": { "id": "price_growth" },
                "current_period_start": 100,
                "current_period_end": 200
            } ] }
        }));

        let update = subscription_update(&sub, &catalog()).unwrap();
        assert_eq!(update.period.start.timestamp(), 100);
        assert_eq!(update.period.end.timestamp(), 200);
    }

    #[test]
    fn test_subscription_update_rejects_bundle_price() {
        let sub = subscription(serde_json::json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "active",
            "current_period_start": 100,
            "current_period_end": 200,
            "items": { "data": [ { "price": { "id": "price_small" } } ] }
        }));

        assert!(matches!(
            subscription_update(&sub, &catalog()),
            Err(PayloadError::UnknownPrice(id)) if id == "price_small"
        ));
    }

    #[test]
    fn test_subscription_update_missing_period() {
        let sub = subscription(serde_json::json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "active",
            "items": { "data": [ { "price": { "id": "price_growth" } } ] }
        }));

        assert!(matches!(
            subscription_update(&sub, &catalog()),
            Err(PayloadError::MissingPeriod(_))
        ));
    }
}
