//! Starting fittings and applying their results.
//!
//! A fitting is paid for before the workflow engine sees it. Any failure
//! after payment moves the session to `failed` and refunds the credit. The
//! refund only happens when that transition actually took place, so a late
//! callback and a trigger failure never refund twice.

use atelier_core::{ConsumerId, FittingId, FittingStatus};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use crate::db::{FittingRepository, ShopRepository, SubscriptionRepository};
use crate::error::AppError;
use crate::models::{FittingSession, NewFitting};
use crate::state::AppState;
use crate::workflow::{CallbackOutcome, FittingCallback, FittingJob};

/// Lifetime of the signed person image URL handed to the workflow.
pub const PERSON_IMAGE_URL_TTL_SECS: u64 = 3600;

/// Request to start a fitting.
#[derive(Debug, Clone, Deserialize)]
pub struct StartFitting {
    /// Slug of the shop the garment belongs to.
    pub shop: String,
    pub garment_image_url: String,
    /// Storage path returned by the upload endpoint.
    pub person_image_path: String,
}

/// Check that a storage path lives under the consumer's own prefix.
#[must_use]
pub fn owns_upload_path(consumer_id: ConsumerId, path: &str) -> bool {
    let Some(rest) = path.strip_prefix(&format!("{consumer_id}/")) else {
        return false;
    };
    !rest.is_empty() && !rest.split('/').any(|segment| segment.is_empty() || segment == "..")
}

fn is_http_url(raw: &str) -> bool {
    url::Url::parse(raw).is_ok_and(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
}

/// Pay for and start a fitting.
///
/// # Errors
///
/// - `NotFound` if the shop is unknown or inactive
/// - `Forbidden` if the person image does not belong to the consumer
/// - `BadRequest` if the garment URL is not http(s)
/// - `Credit` if the retailer has nothing left to spend
/// - `Workflow`/`Supabase` if the job could not be handed off (credit refunded)
#[instrument(skip(state, request), fields(consumer_id = %consumer_id, shop = %request.shop))]
pub async fn start(
    state: &AppState,
    consumer_id: ConsumerId,
    request: StartFitting,
    now: DateTime<Utc>,
) -> Result<FittingSession, AppError> {
    if !owns_upload_path(consumer_id, &request.person_image_path) {
        return Err(AppError::Forbidden(
            "Person image does not belong to you".to_string(),
        ));
    }

    if !is_http_url(&request.garment_image_url) {
        return Err(AppError::BadRequest(
            "garment_image_url must be an http(s) URL".to_string(),
        ));
    }

    let shop = ShopRepository::new(state.pool())
        .get_active_by_slug(&request.shop)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Shop '{}' not found", request.shop)))?;

    let fitting = NewFitting {
        id: FittingId::random(),
        consumer_id,
        shop_id: shop.id,
        retailer_id: shop.retailer_id,
        garment_image_url: request.garment_image_url,
        person_image_path: request.person_image_path,
    };

    let session = SubscriptionRepository::new(state.pool())
        .consume_credit(&fitting, now)
        .await?;

    match hand_off(state, &session).await {
        Ok(()) => {
            let fittings = FittingRepository::new(state.pool());
            match fittings
                .transition(session.id, FittingStatus::Processing, None, None)
                .await?
            {
                Some(processing) => Ok(processing),
                // A fast callback already finished the session.
                None => Ok(fittings.get(session.id).await?.unwrap_or(session)),
            }
        }
        Err(err) => {
            error!(fitting_id = %session.id, error = %err, "Failed to hand off fitting");
            fail_and_refund(state, &session, "Fitting could not be started").await;
            Err(err)
        }
    }
}

async fn hand_off(state: &AppState, session: &FittingSession) -> Result<(), AppError> {
    let person_image = state
        .storage()
        .signed_url(&session.person_image_path, PERSON_IMAGE_URL_TTL_SECS)
        .await?;

    let job = FittingJob {
        session_id: session.id,
        shop_id: session.shop_id,
        garment_image_url: session.garment_image_url.clone(),
        person_image_url: person_image.url,
        callback_url: state.config().fitting_callback_url(),
    };
    state.workflow().trigger(&job).await?;
    Ok(())
}

/// Mark a session failed and give its credit back.
///
/// Errors are logged, not returned: the caller is already on a failure path.
async fn fail_and_refund(state: &AppState, session: &FittingSession, reason: &str) {
    let failed = FittingRepository::new(state.pool())
        .transition(session.id, FittingStatus::Failed, None, Some(reason))
        .await;

    match failed {
        Ok(Some(failed)) => refund(state, &failed).await,
        Ok(None) => warn!(fitting_id = %session.id, "Session already finished, no refund"),
        Err(e) => error!(fitting_id = %session.id, error = %e, "Failed to mark session failed"),
    }
}

async fn refund(state: &AppState, session: &FittingSession) {
    let reference = session.id.to_string();
    if let Err(e) = SubscriptionRepository::new(state.pool())
        .refund_credit(session.retailer_id, session.credit_source, &reference)
        .await
    {
        error!(fitting_id = %session.id, error = %e, "Failed to refund fitting credit");
    }
}

/// The session change a callback asks for.
#[derive(Debug, PartialEq, Eq)]
struct CallbackResult<'a> {
    status: FittingStatus,
    image_url: Option<&'a str>,
    error: Option<&'a str>,
}

impl<'a> CallbackResult<'a> {
    fn from_callback(callback: &'a FittingCallback) -> Result<Self, AppError> {
        match callback.status {
            CallbackOutcome::Completed => {
                let url = callback
                    .result_image_url
                    .as_deref()
                    .filter(|u| is_http_url(u))
                    .ok_or_else(|| {
                        AppError::BadRequest(
                            "Completed fitting needs a result_image_url".to_string(),
                        )
                    })?;
                Ok(Self {
                    status: FittingStatus::Completed,
                    image_url: Some(url),
                    error: None,
                })
            }
            CallbackOutcome::Failed => Ok(Self {
                status: FittingStatus::Failed,
                image_url: None,
                error: Some(callback.error.as_deref().unwrap_or("Fitting failed")),
            }),
        }
    }
}

/// Apply a result posted by the workflow engine.
///
/// A session that already finished is returned unchanged.
///
/// # Errors
///
/// - `NotFound` if the session is unknown
/// - `BadRequest` if a completed result carries no image URL
#[instrument(skip(state, callback), fields(fitting_id = %callback.session_id))]
pub async fn complete(state: &AppState, callback: FittingCallback) -> Result<FittingSession, AppError> {
    let fittings = FittingRepository::new(state.pool());

    let current = fittings
        .get(callback.session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Fitting {} not found", callback.session_id)))?;

    if current.status.is_terminal() {
        info!(status = %current.status, "Callback for finished session ignored");
        return Ok(current);
    }

    let result = CallbackResult::from_callback(&callback)?;
    let Some(updated) = fittings
        .transition(current.id, result.status, result.image_url, result.error)
        .await?
    else {
        // Lost a race with another callback or a trigger failure.
        return Ok(fittings.get(current.id).await?.unwrap_or(current));
    };

    if result.status == FittingStatus::Failed {
        refund(state, &updated).await;
    }

    info!(status = %updated.status, "Fitting result applied");
    Ok(updated)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_owns_upload_path() {
        let consumer = ConsumerId::random();
        assert!(owns_upload_path(consumer, &format!("{consumer}/photo.jpg")));
        assert!(!owns_upload_path(consumer, "someone/photo.jpg"));
        assert!(!owns_upload_path(consumer, &format!("{consumer}/")));
        assert!(!owns_upload_path(consumer, &format!("{consumer}/../other/photo.jpg")));
        assert!(!owns_upload_path(consumer, &format!("{consumer}//photo.jpg")));
        assert!(!owns_upload_path(consumer, &format!("x{consumer}/photo.jpg")));
    }

    fn callback(
        status: CallbackOutcome,
        result_image_url: Option<&str>,
        error: Option<&str>,
    ) -> FittingCallback {
        FittingCallback {
            session_id: FittingId::random(),
            status,
            result_image_url: result_image_url.map(str::to_string),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_completed_callback_needs_result_image() {
        let done = callback(
            CallbackOutcome::Completed,
            Some("https://cdn.example.com/result.png"),
            None,
        );
        assert_eq!(
            CallbackResult::from_callback(&done).unwrap(),
            CallbackResult {
                status: FittingStatus::Completed,
                image_url: Some("https://cdn.example.com/result.png"),
                error: None,
            }
        );

        let missing = callback(CallbackOutcome::Completed, None, None);
        assert!(matches!(
            CallbackResult::from_callback(&missing),
            Err(AppError::BadRequest(_))
        ));

        let bad_scheme = callback(CallbackOutcome::Completed, Some("file:///etc/passwd"), None);
        assert!(CallbackResult::from_callback(&bad_scheme).is_err());
    }

    #[test]
    fn test_failed_callback_keeps_engine_error() {
        let failed = callback(CallbackOutcome::Failed, None, Some("model timeout"));
        let result = CallbackResult::from_callback(&failed).unwrap();
        assert_eq!(result.status, FittingStatus::Failed);
        assert_eq!(result.error, Some("model timeout"));
        assert_eq!(result.image_url, None);

        let silent = callback(CallbackOutcome::Failed, None, None);
        assert_eq!(
            CallbackResult::from_callback(&silent).unwrap().error,
            Some("Fitting failed")
        );
    }

    #[test]
    fn test_is_http_url() {
        assert!(is_http_url("https://shop.example.com/dress.png"));
        assert!(is_http_url("http://localhost:9000/a.jpg"));
        assert!(!is_http_url("ftp://example.com/a.jpg"));
        assert!(!is_http_url("javascript:alert(1)"));
        assert!(!is_http_url("not a url"));
    }
}
