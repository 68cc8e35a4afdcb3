//! Shop management for retailers.

use atelier_core::{Plan, ShopId, slugify};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::info;

use super::auth::clean_name;
use super::retailer::load_subscription;
use crate::db::{ShopRepository, ShopUpdate};
use crate::error::{AppError, Result};
use crate::middleware::RequireRetailer;
use crate::models::Shop;
use crate::state::AppState;

/// New shop.
#[derive(Debug, Deserialize)]
pub struct CreateShopRequest {
    pub name: String,
    /// Derived from `name` when omitted.
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

/// Shop changes. Omitted fields stay; an empty `domain` clears it.
#[derive(Debug, Deserialize)]
pub struct UpdateShopRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Normalize a bare host name such as `shop.example.com`.
///
/// Returns `Ok(None)` for an empty string.
fn normalize_domain(raw: &str) -> Result<Option<String>> {
    let domain = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return Ok(None);
    }

    let valid = domain.len() <= 253
        && domain.contains('.')
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });

    if valid {
        Ok(Some(domain))
    } else {
        Err(AppError::BadRequest(format!("Invalid domain: {raw}")))
    }
}

/// Refuse another shop once `plan` is at its limit.
fn ensure_shop_capacity(plan: Plan, existing: i64) -> Result<()> {
    if existing >= i64::from(plan.max_shops()) {
        return Err(AppError::Forbidden(format!(
            "The {plan} plan allows {} shop(s); upgrade to add more",
            plan.max_shops()
        )));
    }
    Ok(())
}

fn required_name(raw: &str) -> Result<String> {
    clean_name(raw, "name")?.ok_or_else(|| AppError::BadRequest("name is required".to_string()))
}

/// GET /api/retailer/shops
///
/// # Errors
///
/// Returns 500 if the query fails.
pub async fn list(
    State(state): State<AppState>,
    retailer: RequireRetailer,
) -> Result<Json<Vec<Shop>>> {
    let shops = ShopRepository::new(state.pool())
        .list_by_retailer(retailer.id())
        .await?;
    Ok(Json(shops))
}

/// POST /api/retailer/shops
///
/// # Errors
///
/// - 400 for an invalid name, slug, or domain
/// - 403 when the plan's shop limit is reached
/// - 409 when the slug is taken
pub async fn create(
    State(state): State<AppState>,
    retailer: RequireRetailer,
    Json(form): Json<CreateShopRequest>,
) -> Result<(StatusCode, Json<Shop>)> {
    let name = required_name(&form.name)?;
    let slug = slugify(form.slug.as_deref().unwrap_or(&name))
        .map_err(|e| AppError::BadRequest(format!("slug: {e}")))?;
    let domain = match form.domain.as_deref() {
        Some(raw) => normalize_domain(raw)?,
        None => None,
    };

    let plan = load_subscription(&state, &retailer).await?.state.plan;
    let shops = ShopRepository::new(state.pool());
    ensure_shop_capacity(plan, shops.count_by_retailer(retailer.id()).await?)?;

    let shop = shops
        .create(retailer.id(), &name, &slug, domain.as_deref())
        .await?;
    info!(retailer_id = %retailer.id(), shop_id = %shop.id, slug = %shop.slug, "Shop created");
    Ok((StatusCode::CREATED, Json(shop)))
}

/// GET /api/retailer/shops/{id}
///
/// # Errors
///
/// Returns 404 if the shop does not exist or belongs to someone else.
pub async fn get(
    State(state): State<AppState>,
    retailer: RequireRetailer,
    Path(id): Path<ShopId>,
) -> Result<Json<Shop>> {
    ShopRepository::new(state.pool())
        .get_for_retailer(id, retailer.id())
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Shop {id} not found")))
}

/// PATCH /api/retailer/shops/{id}
///
/// # Errors
///
/// Returns 400 for invalid fields, 404 for an unknown shop.
pub async fn update(
    State(state): State<AppState>,
    retailer: RequireRetailer,
    Path(id): Path<ShopId>,
    Json(form): Json<UpdateShopRequest>,
) -> Result<Json<Shop>> {
    let changes = ShopUpdate {
        name: form.name.as_deref().map(required_name).transpose()?,
        domain: match form.domain.as_deref() {
            Some(raw) => Some(normalize_domain(raw)?.unwrap_or_default()),
            None => None,
        },
        is_active: form.is_active,
    };

    let shop = ShopRepository::new(state.pool())
        .update(id, retailer.id(), &changes)
        .await?;
    Ok(Json(shop))
}

/// DELETE /api/retailer/shops/{id}
///
/// # Errors
///
/// Returns 404 for an unknown shop.
pub async fn delete(
    State(state): State<AppState>,
    retailer: RequireRetailer,
    Path(id): Path<ShopId>,
) -> Result<StatusCode> {
    ShopRepository::new(state.pool())
        .delete(id, retailer.id())
        .await?;
    info!(retailer_id = %retailer.id(), shop_id = %id, "Shop deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(
            normalize_domain(" Shop.Example.COM. ").unwrap(),
            Some("shop.example.com".to_string())
        );
        assert_eq!(normalize_domain("").unwrap(), None);
        assert!(normalize_domain("https://shop.example.com").is_err());
        assert!(normalize_domain("localhost").is_err());
        assert!(normalize_domain("-bad.example.com").is_err());
        assert!(normalize_domain("a..b").is_err());
    }

    #[test]
    fn test_shop_limit_per_plan() {
        assert!(ensure_shop_capacity(Plan::Free, 0).is_ok());
        assert!(matches!(
            ensure_shop_capacity(Plan::Free, 1),
            Err(AppError::Forbidden(_))
        ));
        assert!(ensure_shop_capacity(Plan::Growth, 2).is_ok());
        assert!(matches!(
            ensure_shop_capacity(Plan::Growth, 3),
            Err(AppError::Forbidden(_))
        ));
        assert!(ensure_shop_capacity(Plan::Scale, 9).is_ok());

        let err = ensure_shop_capacity(Plan::Starter, 1).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }
}
