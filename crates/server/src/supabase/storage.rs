//! Object storage client.

use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{SupabaseError, error_message};
use crate::config::SupabaseConfig;

/// A time-limited download URL for a private object.
#[derive(Debug, Clone, Serialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_in: u64,
}

#[derive(Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

/// Client for the hosted storage API, authenticated with the service-role key.
#[derive(Clone)]
pub struct StorageClient {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient")
            .field("base_url", &self.base_url)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl StorageClient {
    /// Create a new storage client.
    ///
    /// # Errors
    ///
    /// Returns error if the service-role key is not a valid header value or
    /// the HTTP client fails to build.
    pub fn new(config: &SupabaseConfig) -> Result<Self, SupabaseError> {
        let key = config.service_role_key.expose_secret();
        let invalid = |e: reqwest::header::InvalidHeaderValue| {
            SupabaseError::Parse(format!("Invalid service role key format: {e}"))
        };

        let mut headers = HeaderMap::new();
        headers.insert("apikey", HeaderValue::from_str(key).map_err(invalid)?);
        let mut auth = HeaderValue::from_str(&format!("Bearer {key}")).map_err(invalid)?;
        auth.set_sensitive(true);
        headers.insert("Authorization", auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: format!("{}/storage/v1", config.url),
            bucket: config.storage_bucket.clone(),
        })
    }

    /// Bucket objects are written to.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Store an object. Existing objects are never overwritten.
    ///
    /// # Errors
    ///
    /// Returns `Api` if the platform refuses the object.
    #[instrument(skip(self, bytes), fields(bucket = %self.bucket, size = bytes.len()))]
    pub async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), SupabaseError> {
        let url = format!("{}/object/{}/{}", self.base_url, self.bucket, encode_path(path));

        let response = self
            .client
            .post(url)
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;
        check(response).await?;

        debug!("Object stored");
        Ok(())
    }

    /// Create a signed download URL valid for `expires_in` seconds.
    ///
    /// # Errors
    ///
    /// Returns `Api` if the object does not exist or signing fails.
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    pub async fn signed_url(&self, path: &str, expires_in: u64) -> Result<SignedUrl, SupabaseError> {
        let url = format!(
            "{}/object/sign/{}/{}",
            self.base_url,
            self.bucket,
            encode_path(path)
        );

        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "expiresIn": expires_in }))
            .send()
            .await?;
        let signed: SignResponse = check(response)
            .await?
            .json()
            .await
            .map_err(|e| SupabaseError::Parse(e.to_string()))?;

        // The platform answers with a path relative to the storage root.
        let url = if signed.signed_url.starts_with("http") {
            signed.signed_url
        } else {
            format!(
                "{}/{}",
                self.base_url,
                signed.signed_url.trim_start_matches('/')
            )
        };

        Ok(SignedUrl { url, expires_in })
    }

    /// Delete objects by path.
    ///
    /// # Errors
    ///
    /// Returns `Api` if the platform refuses the request.
    #[instrument(skip(self), fields(bucket = %self.bucket, count = paths.len()))]
    pub async fn remove(&self, paths: &[String]) -> Result<(), SupabaseError> {
        if paths.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .delete(format!("{}/object/{}", self.base_url, self.bucket))
            .json(&serde_json::json!({ "prefixes": paths }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

/// Percent-encode each path segment, keeping the separators.
fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, SupabaseError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = error_message(&response.text().await.unwrap_or_default());
    Err(SupabaseError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(url: &str) -> StorageClient {
        StorageClient::new(&SupabaseConfig {
            url: url.to_string(),
            anon_key: "anon-public-key".to_string(),
            service_role_key: SecretString::from("service-role-key"),
            storage_bucket: "uploads".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_encode_path() {
        assert_eq!(encode_path("abc/def.jpg"), "abc/def.jpg");
        assert_eq!(encode_path("/a b/c.png"), "a%20b/c.png");
    }

    #[tokio::test]
    async fn test_upload_posts_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/uploads/user-1/photo.jpg"))
            .and(header("authorization", "Bearer service-role-key"))
            .and(header("content-type", "image/jpeg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "Key": "uploads/user-1/photo.jpg" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        client(&server.uri())
            .upload("user-1/photo.jpg", vec![0xFF, 0xD8, 0xFF], "image/jpeg")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upload_conflict_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/uploads/user-1/photo.jpg"))
            .respond_with(
                ResponseTemplate::new(409)
                    .set_body_json(serde_json::json!({ "message": "The resource already exists" })),
            )
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .upload("user-1/photo.jpg", vec![1], "image/jpeg")
            .await
            .unwrap_err();
        assert!(
            matches!(err, SupabaseError::Api { status: 409, ref message } if message == "The resource already exists")
        );
    }

    #[tokio::test]
    async fn test_signed_url_is_absolute() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/sign/uploads/user-1/photo.jpg"))
            .and(body_json(serde_json::json!({ "expiresIn": 3600 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "signedURL": "/object/sign/uploads/user-1/photo.jpg?token=abc"
            })))
            .mount(&server)
            .await;

        let signed = client(&server.uri())
            .signed_url("user-1/photo.jpg", 3600)
            .await
            .unwrap();
        assert_eq!(
            signed.url,
            format!(
                "{}/storage/v1/object/sign/uploads/user-1/photo.jpg?token=abc",
                server.uri()
            )
        );
        assert_eq!(signed.expires_in, 3600);
    }

    #[tokio::test]
    async fn test_remove_sends_prefixes() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/storage/v1/object/uploads"))
            .and(body_json(serde_json::json!({ "prefixes": ["user-1/a.png"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        client(&server.uri())
            .remove(&["user-1/a.png".to_string()])
            .await
            .unwrap();
    }
}
