//! Payments REST client.
//!
//! The API takes `application/x-www-form-urlencoded` bodies with bracketed
//! keys for nested fields (`line_items[0][price]`).

use atelier_core::{Bundle, Plan, RetailerId};
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::StripeError;
use crate::config::StripeConfig;

/// Redirect targets for a checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct HostedPage {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

/// Payments API client.
#[derive(Clone)]
pub struct StripeClient {
    client: reqwest::Client,
    api_base: String,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.api_base)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

impl StripeClient {
    /// Create a new payments client.
    ///
    /// # Errors
    ///
    /// Returns error if the secret key is not a valid header value or the
    /// HTTP client fails to build.
    pub fn new(config: &StripeConfig) -> Result<Self, StripeError> {
        let mut headers = HeaderMap::new();
        let mut auth =
            HeaderValue::from_str(&format!("Bearer {}", config.secret_key.expose_secret()))
                .map_err(|e| StripeError::Parse(format!("Invalid API key format: {e}")))?;
        auth.set_sensitive(true);
        headers.insert("Authorization", auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
        })
    }

    /// Create a customer for a retailer.
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails.
    #[instrument(skip(self), fields(retailer_id = %retailer_id))]
    pub async fn create_customer(
        &self,
        email: &str,
        retailer_id: RetailerId,
    ) -> Result<String, StripeError> {
        let form = vec![
            ("email", email.to_string()),
            ("metadata[retailer_id]", retailer_id.to_string()),
        ];

        let created: Created = self.post_form("/v1/customers", &form).await?;
        debug!(customer = %created.id, "Customer created");
        Ok(created.id)
    }

    /// Create a subscription checkout session and return its hosted URL.
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails or no URL is returned.
    #[instrument(skip(self, urls), fields(retailer_id = %retailer_id, plan = %plan))]
    pub async fn create_subscription_checkout(
        &self,
        customer: &str,
        price_id: &str,
        retailer_id: RetailerId,
        plan: Plan,
        urls: &CheckoutUrls,
    ) -> Result<String, StripeError> {
        let mut form = checkout_form(customer, price_id, retailer_id, urls, "subscription");
        form.push(("metadata[plan]", plan.to_string()));
        form.push((
            "subscription_data[metadata][retailer_id]",
            retailer_id.to_string(),
        ));

        let page: HostedPage = self.post_form("/v1/checkout/sessions", &form).await?;
        hosted_url(page)
    }

    /// Create a one-off bundle checkout session and return its hosted URL.
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails or no URL is returned.
    #[instrument(skip(self, urls), fields(retailer_id = %retailer_id, bundle = %bundle))]
    pub async fn create_bundle_checkout(
        &self,
        customer: &str,
        price_id: &str,
        retailer_id: RetailerId,
        bundle: Bundle,
        urls: &CheckoutUrls,
    ) -> Result<String, StripeError> {
        let mut form = checkout_form(customer, price_id, retailer_id, urls, "payment");
        form.push(("metadata[bundle]", bundle.to_string()));

        let page: HostedPage = self.post_form("/v1/checkout/sessions", &form).await?;
        hosted_url(page)
    }

    /// Create a billing portal session and return its URL.
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails or no URL is returned.
    #[instrument(skip(self))]
    pub async fn create_portal_session(
        &self,
        customer: &str,
        return_url: &str,
    ) -> Result<String, StripeError> {
        let form = vec![
            ("customer", customer.to_string()),
            ("return_url", return_url.to_string()),
        ];

        let page: HostedPage = self
            .post_form("/v1/billing_portal/sessions", &form)
            .await?;
        hosted_url(page)
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<T, StripeError> {
        let response = self
            .client
            .post(format!("{}{path}", self.api_base))
            .form(form)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or(body);
            return Err(StripeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| StripeError::Parse(e.to_string()))
    }
}

fn checkout_form(
    customer: &str,
    price_id: &str,
    retailer_id: RetailerId,
    urls: &CheckoutUrls,
    mode: &str,
) -> Vec<(&'static str, String)> {
    vec![
        ("mode", mode.to_string()),
        ("customer", customer.to_string()),
        ("client_reference_id", retailer_id.to_string()),
        ("line_items[0][price]", price_id.to_string()),
        ("line_items[0][quantity]", "1".to_string()),
        ("success_url", urls.success_url.clone()),
        ("cancel_url", urls.cancel_url.clone()),
        ("metadata[retailer_id]", retailer_id.to_string()),
    ]
}

fn hosted_url(page: HostedPage) -> Result<String, StripeError> {
    page.url
        .ok_or_else(|| StripeError::Parse(format!("session {} has no url", page.id)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use atelier_core::PriceCatalog;
    use secrecy::SecretString;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(url: &str) -> StripeClient {
        StripeClient::new(&StripeConfig {
            api_base: url.to_string(),
            secret_key: SecretString::from("sk_test_key"),
            webhook_secret: SecretString::from("whsec_key"),
            webhook_tolerance_secs: 300,
            prices: PriceCatalog::new(),
        })
        .unwrap()
    }

    fn urls() -> CheckoutUrls {
        CheckoutUrls {
            success_url: "https://app.example.com/billing?checkout=success".to_string(),
            cancel_url: "https://app.example.com/billing?checkout=cancel".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_customer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/customers"))
            .and(header("authorization", "Bearer sk_test_key"))
            .and(body_string_contains("email=shop%40example.com"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "cus_123" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server.uri())
            .create_customer("shop@example.com", RetailerId::random())
            .await
            .unwrap();
        assert_eq!(id, "cus_123");
    }

    #[tokio::test]
    async fn test_subscription_checkout_form() {
        let server = MockServer::start().await;
        let retailer_id = RetailerId::random();
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(body_string_contains("mode=subscription"))
            .and(body_string_contains("line_items%5B0%5D%5Bprice%5D=price_growth"))
            .and(body_string_contains("metadata%5Bplan%5D=growth"))
            .and(body_string_contains(format!(
                "client_reference_id={retailer_id}"
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_test_1",
                "url": "https://checkout.example.com/cs_test_1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let url = client(&server.uri())
            .create_subscription_checkout("cus_1", "price_growth", retailer_id, Plan::Growth, &urls())
            .await
            .unwrap();
        assert_eq!(url, "https://checkout.example.com/cs_test_1");
    }

    #[tokio::test]
    async fn test_bundle_checkout_uses_payment_mode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(body_string_contains("mode=payment"))
            .and(body_string_contains("metadata%5Bbundle%5D=medium"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_test_2",
                "url": "https://checkout.example.com/cs_test_2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let url = client(&server.uri())
            .create_bundle_checkout(
                "cus_1",
                "price_medium",
                RetailerId::random(),
                Bundle::Medium,
                &urls(),
            )
            .await
            .unwrap();
        assert_eq!(url, "https://checkout.example.com/cs_test_2");
    }

    #[tokio::test]
    async fn test_portal_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/billing_portal/sessions"))
            .and(body_string_contains("customer=cus_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "bps_1",
                "url": "https://billing.example.com/p/session"
            })))
            .mount(&server)
            .await;

        let url = client(&server.uri())
            .create_portal_session("cus_1", "https://app.example.com/billing")
            .await
            .unwrap();
        assert_eq!(url, "https://billing.example.com/p/session");
    }

    #[tokio::test]
    async fn test_api_error_message_is_extracted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/customers"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "type": "invalid_request_error", "message": "Invalid email address" }
            })))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .create_customer("nope", RetailerId::random())
            .await
            .unwrap_err();
        assert!(
            matches!(err, StripeError::Api { status: 400, ref message } if message == "Invalid email address")
        );
    }
}
