//! Plan catalog, subscription state, and hosted checkout links.

use atelier_core::{Bundle, Plan};
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::retailer::load_subscription;
use crate::db::RetailerRepository;
use crate::error::{AppError, Result};
use crate::middleware::RequireRetailer;
use crate::models::Subscription;
use crate::state::AppState;
use crate::stripe::CheckoutUrls;

/// A plan as shown on the pricing page.
#[derive(Debug, Serialize)]
pub struct PlanInfo {
    pub plan: Plan,
    pub included_sessions: u32,
    pub max_shops: u32,
    pub monthly_price_cents: i64,
    pub monthly_price: String,
    /// Whether checkout is offered for this plan.
    pub purchasable: bool,
}

/// A bundle as shown on the pricing page.
#[derive(Debug, Serialize)]
pub struct BundleInfo {
    pub bundle: Bundle,
    pub sessions: u32,
    pub price_cents: i64,
    pub price: String,
    pub purchasable: bool,
}

/// Public catalog.
#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub plans: Vec<PlanInfo>,
    pub bundles: Vec<BundleInfo>,
}

/// Subscription checkout. Plans are names (`starter`, `growth`, `scale`).
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan: String,
}

/// Bundle checkout.
#[derive(Debug, Deserialize)]
pub struct BundleCheckoutRequest {
    pub bundle: String,
}

/// A hosted page to redirect the browser to.
#[derive(Debug, Serialize)]
pub struct RedirectResponse {
    pub url: String,
}

/// GET /api/billing/plans
pub async fn plans(State(state): State<AppState>) -> Json<CatalogResponse> {
    let prices = &state.config().stripe.prices;

    let plans = Plan::ALL
        .iter()
        .map(|&plan| PlanInfo {
            plan,
            included_sessions: plan.included_sessions(),
            max_shops: plan.max_shops(),
            monthly_price_cents: plan.monthly_price_cents(),
            monthly_price: plan.monthly_price().display(),
            purchasable: plan.is_paid() && prices.plan_price(plan).is_some(),
        })
        .collect();

    let bundles = Bundle::ALL
        .iter()
        .map(|&bundle| BundleInfo {
            bundle,
            sessions: bundle.sessions(),
            price_cents: bundle.price_cents(),
            price: bundle.price().display(),
            purchasable: prices.bundle_price(bundle).is_some(),
        })
        .collect();

    Json(CatalogResponse { plans, bundles })
}

/// GET /api/billing/subscription
///
/// # Errors
///
/// Returns 404 if the retailer has no subscription row.
pub async fn subscription(
    State(state): State<AppState>,
    retailer: RequireRetailer,
) -> Result<Json<Subscription>> {
    Ok(Json(load_subscription(&state, &retailer).await?))
}

/// The retailer's provider customer id, created on first use.
async fn ensure_customer(state: &AppState, retailer: &RequireRetailer) -> Result<String> {
    let retailers = RetailerRepository::new(state.pool());
    let profile = retailers
        .get(retailer.id())
        .await?
        .ok_or_else(|| AppError::NotFound("Retailer profile not found".to_string()))?;

    if let Some(customer) = profile.stripe_customer_id {
        return Ok(customer);
    }

    let customer = state
        .stripe()
        .create_customer(profile.email.as_str(), profile.id)
        .await?;
    retailers.set_stripe_customer(profile.id, &customer).await?;
    info!(retailer_id = %profile.id, "Billing customer created");
    Ok(customer)
}

/// Refuse a second provider subscription while the current paid plan still
/// grants sessions. Plan changes go through the billing portal instead.
fn ensure_no_live_plan(subscription: &Subscription) -> Result<()> {
    let state = &subscription.state;
    if state.plan.is_paid() && state.status.grants_included_sessions() {
        return Err(AppError::Conflict(format!(
            "You already have the {} plan; change it in the billing portal",
            state.plan
        )));
    }
    Ok(())
}

fn checkout_urls(state: &AppState) -> CheckoutUrls {
    CheckoutUrls {
        success_url: state.config().checkout_success_url(),
        cancel_url: state.config().checkout_cancel_url(),
    }
}

/// POST /api/billing/checkout
///
/// # Errors
///
/// Returns 400 for the free plan, unknown plans, or plans without a price,
/// and 409 while a paid plan is live.
pub async fn checkout(
    State(state): State<AppState>,
    retailer: RequireRetailer,
    Json(form): Json<CheckoutRequest>,
) -> Result<Json<RedirectResponse>> {
    let plan: Plan = form.plan.parse().map_err(AppError::BadRequest)?;
    if !plan.is_paid() {
        return Err(AppError::BadRequest(
            "The free plan needs no checkout".to_string(),
        ));
    }
    let price = state
        .config()
        .stripe
        .prices
        .plan_price(plan)
        .ok_or_else(|| AppError::BadRequest(format!("Plan {plan} is not for sale")))?
        .to_string();

    ensure_no_live_plan(&load_subscription(&state, &retailer).await?)?;

    let customer = ensure_customer(&state, &retailer).await?;
    let url = state
        .stripe()
        .create_subscription_checkout(&customer, &price, retailer.id(), plan, &checkout_urls(&state))
        .await?;
    Ok(Json(RedirectResponse { url }))
}

/// POST /api/billing/bundles/checkout
///
/// # Errors
///
/// Returns 400 for unknown bundles or bundles without a price.
pub async fn bundle_checkout(
    State(state): State<AppState>,
    retailer: RequireRetailer,
    Json(form): Json<BundleCheckoutRequest>,
) -> Result<Json<RedirectResponse>> {
    let bundle: Bundle = form.bundle.parse().map_err(AppError::BadRequest)?;
    let price = state
        .config()
        .stripe
        .prices
        .bundle_price(bundle)
        .ok_or_else(|| AppError::BadRequest(format!("Bundle {bundle} is not for sale")))?
        .to_string();

    let customer = ensure_customer(&state, &retailer).await?;
    let url = state
        .stripe()
        .create_bundle_checkout(&customer, &price, retailer.id(), bundle, &checkout_urls(&state))
        .await?;
    Ok(Json(RedirectResponse { url }))
}

/// POST /api/billing/portal
///
/// # Errors
///
/// Returns 400 if the retailer has never been through checkout.
pub async fn portal(
    State(state): State<AppState>,
    retailer: RequireRetailer,
) -> Result<Json<RedirectResponse>> {
    let profile = RetailerRepository::new(state.pool())
        .get(retailer.id())
        .await?
        .ok_or_else(|| AppError::NotFound("Retailer profile not found".to_string()))?;
    let customer = profile
        .stripe_customer_id
        .ok_or_else(|| AppError::BadRequest("No billing account yet".to_string()))?;

    let url = state
        .stripe()
        .create_portal_session(&customer, &state.config().portal_return_url())
        .await?;
    Ok(Json(RedirectResponse { url }))
}
