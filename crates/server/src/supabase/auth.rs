//! `GoTrue` auth REST client.

use atelier_core::{Email, Role, UserId};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{SupabaseError, error_message};
use crate::config::SupabaseConfig;

/// A user record as returned by the auth API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    /// Only writable with the service role key.
    #[serde(default)]
    pub app_metadata: serde_json::Map<String, serde_json::Value>,
}

impl SupabaseUser {
    /// Role assigned at signup.
    ///
    /// Read from `app_metadata`: users can edit their own `user_metadata`.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.app_metadata.get("role")?.as_str()?.parse().ok()
    }
}

/// Tokens issued by a successful sign-in or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub user: SupabaseUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Result of a signup.
///
/// `session` is `None` while the platform waits for email confirmation.
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user: SupabaseUser,
    pub session: Option<AuthSession>,
}

/// How an error status should be reported.
#[derive(Clone, Copy)]
enum Failure {
    /// 400/401/403 mean the presented credential is wrong.
    Credentials,
    /// 400/422 carry a message the user can act on.
    Validation,
}

/// Client for the hosted auth API.
#[derive(Clone)]
pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
    service_role_key: SecretString,
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl AuthClient {
    /// Create a new auth client.
    ///
    /// # Errors
    ///
    /// Returns error if the anon key is not a valid header value or the HTTP
    /// client fails to build.
    pub fn new(config: &SupabaseConfig) -> Result<Self, SupabaseError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(&config.anon_key)
                .map_err(|e| SupabaseError::Parse(format!("Invalid anon key format: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: format!("{}/auth/v1", config.url),
            service_role_key: config.service_role_key.clone(),
        })
    }

    /// Register a new user and assign its role in `app_metadata`.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` for duplicate emails or weak passwords, `Api` for
    /// other failures, including a failed role assignment.
    #[instrument(skip(self, password), fields(email = %email, role = %role))]
    pub async fn sign_up(
        &self,
        email: &Email,
        password: &str,
        role: Role,
    ) -> Result<SignUpOutcome, SupabaseError> {
        let body = serde_json::json!({
            "email": email.as_str(),
            "password": password,
        });

        let response = self
            .client
            .post(format!("{}/signup", self.base_url))
            .json(&body)
            .send()
            .await?;
        let value: serde_json::Value = parse(check(response, Failure::Validation).await?).await?;

        // With auto-confirm the platform answers with a session, otherwise
        // with the bare user.
        if value.get("access_token").is_some() {
            let mut session: AuthSession =
                serde_json::from_value(value).map_err(|e| SupabaseError::Parse(e.to_string()))?;
            debug!(user_id = %session.user.id, "Signup returned a session");
            session.user = self.assign_role(session.user.id, role).await?;
            Ok(SignUpOutcome {
                user: session.user.clone(),
                session: Some(session),
            })
        } else {
            let user: SupabaseUser =
                serde_json::from_value(value).map_err(|e| SupabaseError::Parse(e.to_string()))?;
            debug!(user_id = %user.id, "Signup awaiting email confirmation");
            Ok(SignUpOutcome {
                user: self.assign_role(user.id, role).await?,
                session: None,
            })
        }
    }

    /// Store the role in `app_metadata` through the admin API.
    ///
    /// # Errors
    ///
    /// Returns `Api` if the platform refuses the update.
    #[instrument(skip(self), fields(user_id = %user_id, role = %role))]
    pub async fn assign_role(&self, user_id: UserId, role: Role) -> Result<SupabaseUser, SupabaseError> {
        let key = self.service_role_key.expose_secret();
        let response = self
            .client
            .put(format!("{}/admin/users/{user_id}", self.base_url))
            .header("apikey", key)
            .bearer_auth(key)
            .json(&serde_json::json!({ "app_metadata": { "role": role.to_string() } }))
            .send()
            .await?;
        parse(check(response, Failure::Validation).await?).await
    }

    /// Exchange email and password for tokens.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` if the platform rejects the pair.
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn sign_in(&self, email: &Email, password: &str) -> Result<AuthSession, SupabaseError> {
        let response = self
            .client
            .post(format!("{}/token?grant_type=password", self.base_url))
            .json(&serde_json::json!({ "email": email.as_str(), "password": password }))
            .send()
            .await?;

        parse(check(response, Failure::Credentials).await?).await
    }

    /// Exchange a refresh token for a new token pair.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` if the refresh token is unknown or used.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, SupabaseError> {
        let response = self
            .client
            .post(format!("{}/token?grant_type=refresh_token", self.base_url))
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        parse(check(response, Failure::Credentials).await?).await
    }

    /// Resolve an access token to its user.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` if the token is expired or forged.
    #[instrument(skip_all)]
    pub async fn get_user(&self, access_token: &str) -> Result<SupabaseUser, SupabaseError> {
        let response = self
            .client
            .get(format!("{}/user", self.base_url))
            .bearer_auth(access_token)
            .send()
            .await?;

        parse(check(response, Failure::Credentials).await?).await
    }

    /// Revoke the session behind an access token.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` if the token is no longer valid.
    #[instrument(skip_all)]
    pub async fn sign_out(&self, access_token: &str) -> Result<(), SupabaseError> {
        let response = self
            .client
            .post(format!("{}/logout", self.base_url))
            .bearer_auth(access_token)
            .send()
            .await?;

        check(response, Failure::Credentials).await?;
        Ok(())
    }

    /// Send a password recovery email.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` if the platform refuses the address.
    #[instrument(skip(self), fields(email = %email))]
    pub async fn recover(
        &self,
        email: &Email,
        redirect_to: Option<&str>,
    ) -> Result<(), SupabaseError> {
        let mut url = format!("{}/recover", self.base_url);
        if let Some(redirect) = redirect_to {
            url.push_str("?redirect_to=");
            url.push_str(&urlencoding::encode(redirect));
        }

        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "email": email.as_str() }))
            .send()
            .await?;

        check(response, Failure::Validation).await?;
        Ok(())
    }
}

/// Map non-success statuses to errors.
async fn check(response: Response, failure: Failure) -> Result<Response, SupabaseError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = error_message(&response.text().await.unwrap_or_default());
    match (failure, status) {
        (
            Failure::Credentials,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN,
        ) => Err(SupabaseError::InvalidCredentials),
        (Failure::Validation, StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY) => {
            Err(SupabaseError::Rejected(message))
        }
        _ => Err(SupabaseError::Api {
            status: status.as_u16(),
            message,
        }),
    }
}

async fn parse<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, SupabaseError> {
    response
        .json()
        .await
        .map_err(|e| SupabaseError::Parse(e.to_string()))
}
