//! Fitting workflow engine client.
//!
//! A fitting is started by posting a [`FittingJob`] to the engine's webhook.
//! The engine answers later by calling `/api/webhooks/fitting` with a
//! [`FittingCallback`]. Both directions carry the same shared secret in the
//! `x-workflow-secret` header.

use std::time::Duration;

use atelier_core::{FittingId, FittingStatus, ShopId};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::WorkflowConfig;

/// Header carrying the shared secret.
pub const SECRET_HEADER: &str = "x-workflow-secret";

const TRIGGER_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors that can occur when triggering a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// HTTP request failed or timed out.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Engine answered with a non-success status.
    #[error("workflow rejected job: {status} - {message}")]
    Rejected { status: u16, message: String },
}

/// Payload sent to the engine to start a fitting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FittingJob {
    pub session_id: FittingId,
    pub shop_id: ShopId,
    pub garment_image_url: String,
    pub person_image_url: String,
    pub callback_url: String,
}

/// Final state reported by the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    Completed,
    Failed,
}

impl From<CallbackOutcome> for FittingStatus {
    fn from(outcome: CallbackOutcome) -> Self {
        match outcome {
            CallbackOutcome::Completed => Self::Completed,
            CallbackOutcome::Failed => Self::Failed,
        }
    }
}

/// Payload the engine posts back when a fitting finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittingCallback {
    pub session_id: FittingId,
    pub status: CallbackOutcome,
    #[serde(default)]
    pub result_image_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Client for the workflow engine webhook.
#[derive(Clone)]
pub struct WorkflowClient {
    client: Client,
    webhook_url: String,
    secret: SecretString,
}

impl std::fmt::Debug for WorkflowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowClient")
            .field("webhook_url", &self.webhook_url)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl WorkflowClient {
    /// Create a new workflow client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &WorkflowConfig) -> Result<Self, WorkflowError> {
        let client = Client::builder().timeout(TRIGGER_TIMEOUT).build()?;

        Ok(Self {
            client,
            webhook_url: config.webhook_url.clone(),
            secret: config.secret.clone(),
        })
    }

    /// Hand a fitting job to the engine.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` on a non-2xx answer, `Http` on transport failure
    /// or timeout.
    #[instrument(skip(self, job), fields(session_id = %job.session_id, shop_id = %job.shop_id))]
    pub async fn trigger(&self, job: &FittingJob) -> Result<(), WorkflowError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .header(SECRET_HEADER, self.secret.expose_secret())
            .json(job)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(WorkflowError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        debug!("Workflow accepted job");
        Ok(())
    }

    /// Check the secret presented by a callback.
    #[must_use]
    pub fn verify_callback_secret(&self, presented: Option<&str>) -> bool {
        verify_callback_secret(presented, self.secret.expose_secret())
    }
}

/// Compare a presented secret with the configured one in constant time.
#[must_use]
pub fn verify_callback_secret(presented: Option<&str>, secret: &str) -> bool {
    presented.is_some_and(|value| constant_time_compare(value, secret))
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(url: &str) -> WorkflowClient {
        WorkflowClient::new(&WorkflowConfig {
            webhook_url: format!("{url}/webhook/fit"),
            secret: SecretString::from("flow-secret"),
        })
        .unwrap()
    }

    fn job() -> FittingJob {
        FittingJob {
            session_id: FittingId::random(),
            shop_id: ShopId::random(),
            garment_image_url: "https://cdn.example.com/dress.png".to_string(),
            person_image_url: "https://storage.example.com/signed?token=1".to_string(),
            callback_url: "https://api.example.com/api/webhooks/fitting".to_string(),
        }
    }

    #[tokio::test]
    async fn test_trigger_posts_job_with_secret() {
        let server = MockServer::start().await;
        let job = job();
        Mock::given(method("POST"))
            .and(path("/webhook/fit"))
            .and(header(SECRET_HEADER, "flow-secret"))
            .and(body_json(&job))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server.uri()).trigger(&job).await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook/fit"))
            .respond_with(ResponseTemplate::new(500).set_body_string("workflow inactive"))
            .mount(&server)
            .await;

        let err = client(&server.uri()).trigger(&job()).await.unwrap_err();
        assert!(
            matches!(err, WorkflowError::Rejected { status: 500, ref message } if message == "workflow inactive")
        );
    }

    #[test]
    fn test_verify_callback_secret() {
        assert!(verify_callback_secret(Some("flow-secret"), "flow-secret"));
        assert!(!verify_callback_secret(Some("flow-secreT"), "flow-secret"));
        assert!(!verify_callback_secret(Some("flow"), "flow-secret"));
        assert!(!verify_callback_secret(None, "flow-secret"));
    }

    #[test]
    fn test_callback_payload() {
        let callback: FittingCallback = serde_json::from_value(serde_json::json!({
            "session_id": "0b7c6f2e-57a1-4c1e-9d2a-3b1f4e5d6c7a",
            "status": "failed",
            "error": "no person detected"
        }))
        .unwrap();
        assert_eq!(FittingStatus::from(callback.status), FittingStatus::Failed);
        assert!(callback.result_image_url.is_none());
    }
}
