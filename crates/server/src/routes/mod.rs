//! HTTP route handlers for the API.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                         - Liveness
//! GET    /health/ready                   - Readiness (database)
//!
//! # Auth (strict rate limit)
//! POST   /api/auth/consumers/signup      - Consumer signup
//! POST   /api/auth/retailers/signup      - Retailer signup (free plan)
//! POST   /api/auth/login                 - Password login
//! POST   /api/auth/refresh               - Refresh tokens
//! POST   /api/auth/logout                - Revoke session
//! POST   /api/auth/recover               - Password recovery email
//! GET    /api/auth/me                    - Current user
//!
//! # Consumer
//! GET    /api/consumer/profile           - Profile
//! PATCH  /api/consumer/profile           - Update profile
//!
//! # Retailer
//! GET    /api/retailer/profile           - Profile
//! PATCH  /api/retailer/profile           - Update company name
//! GET    /api/retailer/dashboard         - Plan, balance, usage
//! GET    /api/retailer/shops             - List shops
//! POST   /api/retailer/shops             - Create shop
//! GET    /api/retailer/shops/{id}        - Shop detail
//! PATCH  /api/retailer/shops/{id}        - Update shop
//! DELETE /api/retailer/shops/{id}        - Delete shop
//! GET    /api/retailer/fittings          - Sessions across shops
//!
//! # Billing
//! GET    /api/billing/plans              - Public catalog
//! GET    /api/billing/subscription       - Current subscription
//! POST   /api/billing/checkout           - Plan checkout URL
//! POST   /api/billing/bundles/checkout   - Bundle checkout URL
//! POST   /api/billing/portal             - Billing portal URL
//!
//! # Fittings
//! POST   /api/uploads                    - Image upload
//! POST   /api/fittings                   - Start a fitting
//! GET    /api/fittings                   - History
//! GET    /api/fittings/{id}              - One fitting
//!
//! # Webhooks (signed, not rate limited)
//! POST   /api/webhooks/stripe            - Payment events
//! POST   /api/webhooks/fitting           - Workflow results
//! ```

pub mod auth;
pub mod billing;
pub mod consumer;
pub mod fittings;
pub mod retailer;
pub mod shops;
pub mod uploads;
pub mod webhooks;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::from_fn,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use crate::middleware::{
    api_rate_limiter, auth_rate_limiter, request_id_middleware, security_headers_middleware,
};
use crate::state::AppState;

/// Room for multipart boundaries and headers around the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Create the auth routes router.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/consumers/signup", post(auth::consumer_signup))
        .route("/retailers/signup", post(auth::retailer_signup))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/recover", post(auth::recover))
        .route("/me", get(auth::me))
}

/// Create the consumer routes router.
pub fn consumer_routes() -> Router<AppState> {
    Router::new().route(
        "/profile",
        get(consumer::get_profile).patch(consumer::update_profile),
    )
}

/// Create the retailer dashboard routes router.
pub fn retailer_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/profile",
            get(retailer::get_profile).patch(retailer::update_profile),
        )
        .route("/dashboard", get(retailer::dashboard))
        .route("/shops", get(shops::list).post(shops::create))
        .route(
            "/shops/{id}",
            get(shops::get).patch(shops::update).delete(shops::delete),
        )
        .route("/fittings", get(retailer::list_fittings))
}

/// Create the billing routes router.
pub fn billing_routes() -> Router<AppState> {
    Router::new()
        .route("/plans", get(billing::plans))
        .route("/subscription", get(billing::subscription))
        .route("/checkout", post(billing::checkout))
        .route("/bundles/checkout", post(billing::bundle_checkout))
        .route("/portal", post(billing::portal))
}

/// Create the fitting routes router.
pub fn fitting_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(fittings::start).get(fittings::list))
        .route("/{id}", get(fittings::get))
}

/// Create the webhook routes router.
pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/stripe", post(webhooks::stripe))
        .route("/fitting", post(webhooks::fitting))
}

/// CORS for the dashboard origin only.
fn cors_layer(dashboard_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    let origin = url::Url::parse(dashboard_url)
        .ok()
        .map(|u| u.origin().ascii_serialization())
        .and_then(|o| HeaderValue::from_str(&o).ok());

    match origin {
        Some(origin) => cors.allow_origin(origin),
        None => {
            tracing::warn!(dashboard_url, "Dashboard URL has no origin, CORS disabled");
            cors
        }
    }
}

/// Build the full application router.
///
/// Sentry layers are added by the binary so tests can run without a client.
pub fn router(state: AppState) -> Router {
    let upload_limit = state.config().upload_max_bytes + MULTIPART_OVERHEAD_BYTES;

    let limited = Router::new()
        .nest("/consumer", consumer_routes())
        .nest("/retailer", retailer_routes())
        .nest("/billing", billing_routes())
        .nest("/fittings", fitting_routes())
        .route(
            "/uploads",
            post(uploads::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .layer(api_rate_limiter());

    let api = Router::new()
        .nest("/auth", auth_routes().layer(auth_rate_limiter()))
        .nest("/webhooks", webhook_routes())
        .merge(limited);

    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .nest("/api", api)
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config().dashboard_url))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri().path(),
                        request_id = tracing::field::Empty,
                        user_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Verifies database connectivity before returning OK.
/// Returns 503 Service Unavailable if the database is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").fetch_one(state.pool()).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
