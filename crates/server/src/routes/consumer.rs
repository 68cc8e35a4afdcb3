//! Consumer profile.

use axum::{Json, extract::State};
use serde::Deserialize;
use tracing::{info, warn};

use super::auth::clean_name;
use crate::db::{ConsumerRepository, FittingRepository};
use crate::error::{AppError, Result};
use crate::middleware::RequireConsumer;
use crate::models::Consumer;
use crate::services::fitting::owns_upload_path;
use crate::state::AppState;

/// Profile changes. Omitted fields stay as they are; an empty string clears.
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    /// Storage path from `POST /api/uploads`.
    #[serde(default)]
    pub avatar_path: Option<String>,
}

/// GET /api/consumer/profile
///
/// # Errors
///
/// Returns 404 if the account has no consumer row.
pub async fn get_profile(
    State(state): State<AppState>,
    consumer: RequireConsumer,
) -> Result<Json<Consumer>> {
    ConsumerRepository::new(state.pool())
        .get(consumer.id())
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Consumer profile not found".to_string()))
}

/// PATCH /api/consumer/profile
///
/// # Errors
///
/// Returns 400 for an overlong name, 403 for an avatar outside the
/// consumer's uploads.
pub async fn update_profile(
    State(state): State<AppState>,
    consumer: RequireConsumer,
    Json(form): Json<UpdateProfileRequest>,
) -> Result<Json<Consumer>> {
    let display_name = match form.display_name.as_deref() {
        Some(raw) => Some(clean_name(raw, "display_name")?.unwrap_or_default()),
        None => None,
    };

    let avatar_path = form.avatar_path.map(|p| p.trim().to_string());
    if let Some(path) = avatar_path.as_deref()
        && !path.is_empty()
        && !owns_upload_path(consumer.id(), path)
    {
        return Err(AppError::Forbidden(
            "Avatar must be one of your uploads".to_string(),
        ));
    }

    let consumers = ConsumerRepository::new(state.pool());
    let previous = consumers
        .get(consumer.id())
        .await?
        .ok_or_else(|| AppError::NotFound("Consumer profile not found".to_string()))?;

    let updated = consumers
        .update_profile(consumer.id(), display_name.as_deref(), avatar_path.as_deref())
        .await?;

    if let Some(old) = replaced_avatar(previous.avatar_path.as_deref(), updated.avatar_path.as_deref()) {
        remove_upload(&state, old).await;
    }
    Ok(Json(updated))
}

/// The avatar that a profile update left unreferenced, if any.
fn replaced_avatar<'a>(previous: Option<&'a str>, current: Option<&str>) -> Option<&'a str> {
    previous.filter(|old| Some(*old) != current)
}

/// Delete an upload nothing refers to any more.
///
/// Best effort: the profile change already succeeded.
async fn remove_upload(state: &AppState, path: &str) {
    match FittingRepository::new(state.pool()).uses_person_image(path).await {
        Ok(false) => {}
        Ok(true) => return,
        Err(e) => {
            warn!(path, error = %e, "Could not check old avatar usage");
            return;
        }
    }

    match state.storage().remove(&[path.to_string()]).await {
        Ok(()) => info!(path, "Old avatar removed"),
        Err(e) => warn!(path, error = %e, "Failed to remove old avatar"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replaced_avatar() {
        assert_eq!(replaced_avatar(Some("u/a.jpg"), Some("u/b.jpg")), Some("u/a.jpg"));
        assert_eq!(replaced_avatar(Some("u/a.jpg"), None), Some("u/a.jpg"));
        assert_eq!(replaced_avatar(Some("u/a.jpg"), Some("u/a.jpg")), None);
        assert_eq!(replaced_avatar(None, Some("u/b.jpg")), None);
    }
}
