//! Inbound webhooks from the payment provider and the workflow engine.
//!
//! Both read the raw body: the payment signature covers the exact bytes,
//! and the workflow secret is checked before the payload is parsed.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::{error, warn};

use crate::error::{AppError, Result};
use crate::services::{billing, fitting};
use crate::state::AppState;
use crate::stripe::webhook::SIGNATURE_HEADER;
use crate::stripe::{Event, verify_signature};
use crate::workflow::{FittingCallback, SECRET_HEADER};

/// Acknowledgement for a payment event.
#[derive(Debug, Serialize)]
pub struct EventAck {
    pub received: bool,
    pub outcome: &'static str,
}

const fn outcome_name(outcome: billing::EventOutcome) -> &'static str {
    match outcome {
        billing::EventOutcome::Applied => "applied",
        billing::EventOutcome::Duplicate => "duplicate",
        billing::EventOutcome::Ignored => "ignored",
        billing::EventOutcome::UnknownCustomer => "unknown_customer",
        billing::EventOutcome::Untracked => "untracked",
    }
}

/// POST /api/webhooks/stripe
///
/// # Errors
///
/// Returns 400 for a missing or invalid signature or an unparseable event,
/// 500 when processing fails so the provider retries.
pub async fn stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<EventAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing signature".to_string()))?;

    let config = &state.config().stripe;
    verify_signature(
        &body,
        signature,
        config.webhook_secret.expose_secret(),
        config.webhook_tolerance_secs,
        Utc::now().timestamp(),
    )
    .map_err(|e| {
        warn!(error = %e, "Rejected webhook signature");
        AppError::BadRequest("Invalid signature".to_string())
    })?;

    let event = Event::parse(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid event payload: {e}")))?;

    match billing::handle_event(&state, &event, Utc::now()).await {
        Ok(outcome) => Ok(Json(EventAck {
            received: true,
            outcome: outcome_name(outcome),
        })),
        Err(e) => {
            error!(event_id = %event.id, event_type = %event.event_type, error = %e, "Webhook processing failed");
            Err(AppError::Internal(format!("webhook {}: {e}", event.id)))
        }
    }
}

/// POST /api/webhooks/fitting
///
/// # Errors
///
/// Returns 401 for a wrong secret, 400 for a malformed payload, 404 for an
/// unknown session.
pub async fn fitting(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode> {
    let presented = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    if !state.workflow().verify_callback_secret(presented) {
        warn!("Rejected fitting callback with bad secret");
        return Err(AppError::Unauthorized("Invalid workflow secret".to_string()));
    }

    let callback: FittingCallback = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid callback payload: {e}")))?;

    fitting::complete(&state, callback).await?;
    Ok(StatusCode::OK)
}
