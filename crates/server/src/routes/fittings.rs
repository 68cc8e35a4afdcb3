//! Consumer-facing fitting endpoints.

use atelier_core::FittingId;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;

use super::retailer::DEFAULT_PAGE_SIZE;
use crate::db::FittingRepository;
use crate::error::{AppError, Result};
use crate::middleware::RequireConsumer;
use crate::models::FittingSession;
use crate::services::fitting::{self, StartFitting};
use crate::state::AppState;

/// Paging for history.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// POST /api/fittings
///
/// # Errors
///
/// - 402 when the retailer has no sessions left
/// - 403 for a person image outside the consumer's uploads
/// - 404 for an unknown or inactive shop
/// - 502 when the job could not be handed to the workflow engine
pub async fn start(
    State(state): State<AppState>,
    consumer: RequireConsumer,
    Json(request): Json<StartFitting>,
) -> Result<(StatusCode, Json<FittingSession>)> {
    let session = fitting::start(&state, consumer.id(), request, Utc::now()).await?;
    Ok((StatusCode::ACCEPTED, Json(session)))
}

/// GET /api/fittings
///
/// # Errors
///
/// Returns 500 if the query fails.
pub async fn list(
    State(state): State<AppState>,
    consumer: RequireConsumer,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<FittingSession>>> {
    let sessions = FittingRepository::new(state.pool())
        .list_for_consumer(
            consumer.id(),
            page.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            page.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(sessions))
}

/// GET /api/fittings/{id}
///
/// Sessions of other consumers are reported as missing.
///
/// # Errors
///
/// Returns 404 unless the session exists and belongs to the caller.
pub async fn get(
    State(state): State<AppState>,
    consumer: RequireConsumer,
    Path(id): Path<FittingId>,
) -> Result<Json<FittingSession>> {
    FittingRepository::new(state.pool())
        .get(id)
        .await?
        .filter(|session| session.consumer_id == consumer.id())
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Fitting {id} not found")))
}
