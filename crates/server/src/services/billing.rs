//! Applying payment provider events to subscriptions and balances.

use atelier_core::{Bundle, RetailerId, SubscriptionStatus};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::db::{
    EventEffect, EventReceipt, RepositoryError, RetailerRepository, SubscriptionRepository,
    stripe_events,
};
use crate::models::Retailer;
use crate::state::AppState;
use crate::stripe::types::{CheckoutSession, Invoice, Subscription};
use crate::stripe::{Event, EventObject, PayloadError, subscription_update};

/// Failure while applying an event; the provider should redeliver.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// What happened to a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// State changed (or was confirmed unchanged).
    Applied,
    /// The event id was processed before.
    Duplicate,
    /// The event type or payload needs no action.
    Ignored,
    /// No retailer matches the event's customer.
    UnknownCustomer,
    /// The event concerns a provider subscription the retailer does not track.
    Untracked,
}

impl From<EventEffect> for EventOutcome {
    fn from(effect: EventEffect) -> Self {
        match effect {
            EventEffect::Changed(_) => Self::Applied,
            EventEffect::Untracked => Self::Untracked,
            EventEffect::Duplicate => Self::Duplicate,
        }
    }
}

/// Apply a verified event exactly once.
///
/// Balance changes record the event id in their own transaction. Every
/// other outcome is recorded once handling succeeded, so a failure leaves
/// the id unrecorded and the redelivery runs again.
///
/// # Errors
///
/// Returns error if the payload cannot be mapped or the database fails.
#[instrument(skip(state, event), fields(event_id = %event.id, event_type = %event.event_type))]
pub async fn handle_event(
    state: &AppState,
    event: &Event,
    now: DateTime<Utc>,
) -> Result<EventOutcome, BillingError> {
    if stripe_events::is_recorded(state.pool(), &event.id).await? {
        info!("Duplicate event ignored");
        return Ok(EventOutcome::Duplicate);
    }

    let outcome = apply(state, event, now).await?;
    match outcome {
        EventOutcome::Duplicate => {
            info!("Duplicate event ignored");
            return Ok(outcome);
        }
        EventOutcome::UnknownCustomer => warn!("Event for unknown customer acknowledged"),
        EventOutcome::Untracked => info!("Event for an untracked subscription acknowledged"),
        EventOutcome::Applied | EventOutcome::Ignored => {}
    }

    stripe_events::record(state.pool(), receipt(event)).await?;
    Ok(outcome)
}

fn receipt(event: &Event) -> EventReceipt<'_> {
    EventReceipt {
        id: &event.id,
        event_type: &event.event_type,
    }
}

async fn apply(
    state: &AppState,
    event: &Event,
    now: DateTime<Utc>,
) -> Result<EventOutcome, BillingError> {
    match event.object()? {
        EventObject::CheckoutCompleted(session) => checkout_completed(state, event, &session).await,
        EventObject::SubscriptionChanged(subscription) => {
            subscription_changed(state, event, &subscription).await
        }
        EventObject::SubscriptionDeleted(subscription) => {
            subscription_deleted(state, event, &subscription, now).await
        }
        EventObject::InvoicePaymentFailed(invoice) => payment_failed(state, &invoice).await,
        EventObject::Ignored => Ok(EventOutcome::Ignored),
    }
}

/// Find the retailer by metadata reference first, then by customer id.
async fn find_retailer(
    state: &AppState,
    reference: Option<&str>,
    customer: Option<&str>,
) -> Result<Option<Retailer>, RepositoryError> {
    let retailers = RetailerRepository::new(state.pool());

    if let Some(id) = reference.and_then(|r| r.parse::<RetailerId>().ok())
        && let Some(retailer) = retailers.get(id).await?
    {
        return Ok(Some(retailer));
    }

    match customer {
        Some(customer) => retailers.get_by_stripe_customer(customer).await,
        None => Ok(None),
    }
}

async fn checkout_completed(
    state: &AppState,
    event: &Event,
    session: &CheckoutSession,
) -> Result<EventOutcome, BillingError> {
    let Some(retailer) = find_retailer(
        state,
        session.retailer_reference(),
        session.customer.as_deref(),
    )
    .await?
    else {
        return Ok(EventOutcome::UnknownCustomer);
    };

    if let Some(customer) = session.customer.as_deref()
        && retailer.stripe_customer_id.as_deref() != Some(customer)
    {
        RetailerRepository::new(state.pool())
            .set_stripe_customer(retailer.id, customer)
            .await?;
    }

    match session.mode.as_str() {
        // The plan itself arrives with customer.subscription.created.
        "subscription" => {
            info!(retailer_id = %retailer.id, subscription = ?session.subscription, "Subscription checkout completed");
            Ok(EventOutcome::Applied)
        }
        "payment" if session.is_paid() => {
            let Some(bundle) = session
                .metadata
                .get("bundle")
                .and_then(|b| b.parse::<Bundle>().ok())
            else {
                warn!(session_id = %session.id, "Paid checkout without a known bundle");
                return Ok(EventOutcome::Ignored);
            };

            let effect = SubscriptionRepository::new(state.pool())
                .credit_purchase(retailer.id, bundle.sessions(), receipt(event))
                .await?;
            if let EventEffect::Changed(change) = effect {
                info!(
                    retailer_id = %retailer.id,
                    bundle = %bundle,
                    bundle_delta = change.bundle_delta,
                    "Bundle credited"
                );
            }
            Ok(effect.into())
        }
        _ => Ok(EventOutcome::Ignored),
    }
}

async fn subscription_changed(
    state: &AppState,
    event: &Event,
    subscription: &Subscription,
) -> Result<EventOutcome, BillingError> {
    let Some(retailer) = find_retailer(
        state,
        subscription.retailer_reference(),
        Some(&subscription.customer),
    )
    .await?
    else {
        return Ok(EventOutcome::UnknownCustomer);
    };

    let update = subscription_update(subscription, &state.config().stripe.prices)?;
    let effect = SubscriptionRepository::new(state.pool())
        .apply_update(retailer.id, &subscription.id, &update, receipt(event))
        .await?;

    if let EventEffect::Changed(change) = effect {
        info!(
            retailer_id = %retailer.id,
            subscription = %subscription.id,
            plan = %update.plan,
            status = ?update.status,
            reason = change.reason.as_str(),
            included_delta = change.included_delta,
            "Subscription reconciled"
        );
    }
    Ok(effect.into())
}

async fn subscription_deleted(
    state: &AppState,
    event: &Event,
    subscription: &Subscription,
    now: DateTime<Utc>,
) -> Result<EventOutcome, BillingError> {
    let Some(retailer) = find_retailer(
        state,
        subscription.retailer_reference(),
        Some(&subscription.customer),
    )
    .await?
    else {
        return Ok(EventOutcome::UnknownCustomer);
    };

    let effect = SubscriptionRepository::new(state.pool())
        .cancel(retailer.id, &subscription.id, now, receipt(event))
        .await?;
    if let EventEffect::Changed(change) = effect {
        info!(
            retailer_id = %retailer.id,
            subscription = %subscription.id,
            included_delta = change.included_delta,
            "Subscription canceled, back on free tier"
        );
    }
    Ok(effect.into())
}

async fn payment_failed(state: &AppState, invoice: &Invoice) -> Result<EventOutcome, BillingError> {
    let Some(subscription) = invoice.subscription_id() else {
        return Ok(EventOutcome::Ignored);
    };
    let Some(retailer) = find_retailer(state, None, invoice.customer.as_deref()).await? else {
        return Ok(EventOutcome::UnknownCustomer);
    };

    let updated = SubscriptionRepository::new(state.pool())
        .set_status(retailer.id, subscription, SubscriptionStatus::PastDue)
        .await?;
    if !updated {
        return Ok(EventOutcome::Untracked);
    }
    warn!(retailer_id = %retailer.id, invoice = %invoice.id, "Invoice payment failed");
    Ok(EventOutcome::Applied)
}
