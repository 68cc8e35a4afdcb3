//! Retailer profile, dashboard, and fitting history.

use atelier_core::{BillingPeriod, CreditBalance, FittingStatus, Plan, ShopId, SubscriptionStatus};
use axum::{
    Json,
    extract::{Query, State},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::auth::clean_name;
use crate::db::{
    FittingFilter, FittingRepository, RetailerRepository, ShopRepository, SubscriptionRepository,
};
use crate::error::{AppError, Result};
use crate::middleware::RequireRetailer;
use crate::models::{FittingSession, FittingStats, Retailer, Subscription};
use crate::state::AppState;

/// Default page size for list endpoints.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Profile changes.
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub company_name: String,
}

/// Everything the dashboard home shows.
#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub company_name: String,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub period: BillingPeriod,
    pub balance: CreditBalance,
    pub spendable_sessions: u32,
    pub cancel_at_period_end: bool,
    pub usage: FittingStats,
    pub shop_count: i64,
    pub max_shops: u32,
}

/// Filters for the fitting list.
#[derive(Debug, Deserialize)]
pub struct FittingListQuery {
    pub shop_id: Option<ShopId>,
    pub status: Option<FittingStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<FittingListQuery> for FittingFilter {
    fn from(query: FittingListQuery) -> Self {
        Self {
            shop_id: query.shop_id,
            status: query.status,
            limit: query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            offset: query.offset.unwrap_or(0),
        }
        .clamped()
    }
}

async fn load_retailer(state: &AppState, retailer: &RequireRetailer) -> Result<Retailer> {
    RetailerRepository::new(state.pool())
        .get(retailer.id())
        .await?
        .ok_or_else(|| AppError::NotFound("Retailer profile not found".to_string()))
}

/// The retailer's subscription, rolled forward to now.
pub(crate) async fn load_subscription(
    state: &AppState,
    retailer: &RequireRetailer,
) -> Result<Subscription> {
    SubscriptionRepository::new(state.pool())
        .get(retailer.id(), Utc::now())
        .await?
        .ok_or_else(|| AppError::NotFound("Subscription not found".to_string()))
}

/// GET /api/retailer/profile
///
/// # Errors
///
/// Returns 404 if the account has no retailer row.
pub async fn get_profile(
    State(state): State<AppState>,
    retailer: RequireRetailer,
) -> Result<Json<Retailer>> {
    Ok(Json(load_retailer(&state, &retailer).await?))
}

/// PATCH /api/retailer/profile
///
/// # Errors
///
/// Returns 400 for an empty or overlong company name.
pub async fn update_profile(
    State(state): State<AppState>,
    retailer: RequireRetailer,
    Json(form): Json<UpdateProfileRequest>,
) -> Result<Json<Retailer>> {
    let company_name = clean_name(&form.company_name, "company_name")?
        .ok_or_else(|| AppError::BadRequest("company_name is required".to_string()))?;

    let updated = RetailerRepository::new(state.pool())
        .update_company_name(retailer.id(), &company_name)
        .await?;
    Ok(Json(updated))
}

/// GET /api/retailer/dashboard
///
/// # Errors
///
/// Returns 404 if the retailer or its subscription is missing.
pub async fn dashboard(
    State(state): State<AppState>,
    retailer: RequireRetailer,
) -> Result<Json<DashboardResponse>> {
    let profile = load_retailer(&state, &retailer).await?;
    let subscription = load_subscription(&state, &retailer).await?;
    let sub = subscription.state;

    let usage = FittingRepository::new(state.pool())
        .period_stats(retailer.id(), &sub.period)
        .await?;
    let shop_count = ShopRepository::new(state.pool())
        .count_by_retailer(retailer.id())
        .await?;

    Ok(Json(DashboardResponse {
        company_name: profile.company_name,
        plan: sub.plan,
        status: sub.status,
        period: sub.period,
        balance: sub.balance,
        spendable_sessions: sub.spendable(),
        cancel_at_period_end: sub.cancel_at_period_end,
        usage,
        shop_count,
        max_shops: sub.plan.max_shops(),
    }))
}

/// GET /api/retailer/fittings
///
/// # Errors
///
/// Returns 500 if the query fails.
pub async fn list_fittings(
    State(state): State<AppState>,
    retailer: RequireRetailer,
    Query(query): Query<FittingListQuery>,
) -> Result<Json<Vec<FittingSession>>> {
    let sessions = FittingRepository::new(state.pool())
        .list_for_retailer(retailer.id(), query.into())
        .await?;
    Ok(Json(sessions))
}
