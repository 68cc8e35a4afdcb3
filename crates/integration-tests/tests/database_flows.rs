//! Credit spending, refunds, and payment event idempotency against Postgres.
//!
//! Every test returns early unless `ATELIER_TEST_DATABASE_URL` points at a
//! database the suite may migrate and write to. Rows are keyed by fresh
//! random ids, so runs never collide with each other or with earlier data.

#![allow(clippy::unwrap_used)]

use atelier_core::{
    BillingPeriod, ConsumerId, CreditSource, Email, FittingStatus, Plan, RetailerId,
    SubscriptionStatus, SubscriptionUpdate,
};
use atelier_integration_tests::{WEBHOOK_SECRET, app_with_pool, database, state_with_pool};
use atelier_server::db::{
    ConsumerRepository, EventEffect, EventReceipt, FittingRepository, RetailerRepository,
    ShopRepository, SubscriptionRepository, stripe_events,
};
use atelier_server::models::Shop;
use atelier_server::services::fitting::{self, StartFitting};
use atelier_server::state::AppState;
use atelier_server::stripe::compute_signature;
use atelier_server::workflow::{CallbackOutcome, FittingCallback};
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::{Value, json};
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// One ledger row: reason, included delta, bundle delta, reference.
type LedgerRow = (String, i64, i64, Option<String>);

struct Fixture {
    pool: PgPool,
    upstream: MockServer,
    state: AppState,
    retailer: RetailerId,
    consumer: ConsumerId,
    shop: Shop,
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

async fn retailer(pool: &PgPool) -> RetailerId {
    let id = RetailerId::random();
    let email = Email::parse(&format!("{}@retail.example.com", unique("owner"))).unwrap();
    RetailerRepository::new(pool)
        .create(id, &email, "Maison Test", Utc::now())
        .await
        .unwrap();
    id
}

/// Retailer, consumer, and shop, with the workflow engine answering `workflow_status`.
async fn fixture(workflow_status: u16) -> Option<Fixture> {
    let pool = database().await?;
    let upstream = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/storage/v1/object/sign/uploads/.+"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "signedURL": "/object/sign/uploads/person.jpg?token=signed"
        })))
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook/fit"))
        .respond_with(ResponseTemplate::new(workflow_status))
        .mount(&upstream)
        .await;

    let retailer = retailer(&pool).await;
    let consumer = ConsumerId::random();
    let email = Email::parse(&format!("{}@shopper.example.com", unique("shopper"))).unwrap();
    ConsumerRepository::new(&pool)
        .create(consumer, &email, Some("Shopper"))
        .await
        .unwrap();
    let shop = ShopRepository::new(&pool)
        .create(retailer, "Test Boutique", &unique("boutique"), None)
        .await
        .unwrap();

    let state = state_with_pool(&upstream.uri(), pool.clone());
    Some(Fixture {
        pool,
        upstream,
        state,
        retailer,
        consumer,
        shop,
    })
}

impl Fixture {
    fn request(&self) -> StartFitting {
        StartFitting {
            shop: self.shop.slug.clone(),
            garment_image_url: "https://cdn.example.com/dress.png".to_string(),
            person_image_path: format!("{}/person.jpg", self.consumer),
        }
    }

    async fn included_remaining(&self) -> u32 {
        SubscriptionRepository::new(&self.pool)
            .get(self.retailer, Utc::now())
            .await
            .unwrap()
            .unwrap()
            .state
            .balance
            .included_remaining
    }

    async fn ledger(&self) -> Vec<LedgerRow> {
        ledger(&self.pool, self.retailer).await
    }
}

async fn ledger(pool: &PgPool, retailer: RetailerId) -> Vec<LedgerRow> {
    sqlx::query_as(
        "SELECT reason, included_delta, bundle_delta, reference
         FROM atelier.credit_ledger
         WHERE retailer_id = $1
         ORDER BY id",
    )
    .bind(retailer)
    .fetch_all(pool)
    .await
    .unwrap()
}

fn failed_callback(session: &atelier_server::models::FittingSession) -> FittingCallback {
    FittingCallback {
        session_id: session.id,
        status: CallbackOutcome::Failed,
        result_image_url: None,
        error: Some("model timeout".to_string()),
    }
}

fn completed_callback(session: &atelier_server::models::FittingSession) -> FittingCallback {
    FittingCallback {
        session_id: session.id,
        status: CallbackOutcome::Completed,
        result_image_url: Some("https://cdn.example.com/result.png".to_string()),
        error: None,
    }
}

#[tokio::test]
async fn test_fitting_spends_included_credit_with_ledger_row() {
    let Some(fx) = fixture(200).await else {
        return;
    };

    let session = fitting::start(&fx.state, fx.consumer, fx.request(), Utc::now())
        .await
        .unwrap();

    assert_eq!(session.status, FittingStatus::Processing);
    assert_eq!(session.credit_source, CreditSource::Included);
    assert_eq!(fx.included_remaining().await, Plan::Free.included_sessions() - 1);
    assert_eq!(
        fx.ledger().await,
        vec![("consumed".to_string(), -1, 0, Some(session.id.to_string()))]
    );
}

#[tokio::test]
async fn test_trigger_failure_fails_session_and_refunds() {
    let Some(fx) = fixture(500).await else {
        return;
    };

    let err = fitting::start(&fx.state, fx.consumer, fx.request(), Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_GATEWAY);

    let sessions = FittingRepository::new(&fx.pool)
        .list_for_consumer(fx.consumer, 10, 0)
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, FittingStatus::Failed);

    assert_eq!(fx.included_remaining().await, Plan::Free.included_sessions());
    let reference = Some(sessions[0].id.to_string());
    assert_eq!(
        fx.ledger().await,
        vec![
            ("consumed".to_string(), -1, 0, reference.clone()),
            ("refunded".to_string(), 1, 0, reference),
        ]
    );
}

#[tokio::test]
async fn test_failed_callback_refunds_exactly_once() {
    let Some(fx) = fixture(200).await else {
        return;
    };
    let session = fitting::start(&fx.state, fx.consumer, fx.request(), Utc::now())
        .await
        .unwrap();

    let failed = fitting::complete(&fx.state, failed_callback(&session))
        .await
        .unwrap();
    assert_eq!(failed.status, FittingStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("model timeout"));
    assert_eq!(fx.included_remaining().await, Plan::Free.included_sessions());

    // Redelivery and a late success both leave the finished session alone.
    let again = fitting::complete(&fx.state, failed_callback(&session))
        .await
        .unwrap();
    assert_eq!(again.status, FittingStatus::Failed);
    let late = fitting::complete(&fx.state, completed_callback(&session))
        .await
        .unwrap();
    assert_eq!(late.status, FittingStatus::Failed);
    assert_eq!(late.result_image_url, None);

    assert_eq!(fx.included_remaining().await, Plan::Free.included_sessions());
    assert_eq!(fx.ledger().await.len(), 2);
}

#[tokio::test]
async fn test_completed_fitting_keeps_credit_spent() {
    let Some(fx) = fixture(200).await else {
        return;
    };
    let session = fitting::start(&fx.state, fx.consumer, fx.request(), Utc::now())
        .await
        .unwrap();

    let done = fitting::complete(&fx.state, completed_callback(&session))
        .await
        .unwrap();
    assert_eq!(done.status, FittingStatus::Completed);
    assert_eq!(
        done.result_image_url.as_deref(),
        Some("https://cdn.example.com/result.png")
    );
    assert!(done.completed_at.is_some());

    let late = fitting::complete(&fx.state, failed_callback(&session))
        .await
        .unwrap();
    assert_eq!(late.status, FittingStatus::Completed);
    assert_eq!(fx.included_remaining().await, Plan::Free.included_sessions() - 1);
    assert_eq!(fx.ledger().await.len(), 1);
}

#[tokio::test]
async fn test_empty_balance_is_payment_required() {
    let Some(fx) = fixture(200).await else {
        return;
    };
    sqlx::query("UPDATE atelier.subscriptions SET included_remaining = 0 WHERE retailer_id = $1")
        .bind(fx.retailer)
        .execute(&fx.pool)
        .await
        .unwrap();

    let err = fitting::start(&fx.state, fx.consumer, fx.request(), Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::PAYMENT_REQUIRED);

    let sessions = FittingRepository::new(&fx.pool)
        .list_for_consumer(fx.consumer, 10, 0)
        .await
        .unwrap();
    assert!(sessions.is_empty());
    assert!(fx.ledger().await.is_empty());

    let triggered = fx
        .upstream
        .received_requests()
        .await
        .unwrap()
        .iter()
        .any(|r| r.url.path() == "/webhook/fit");
    assert!(!triggered);
}

async fn deliver_stripe(pool: &PgPool, upstream: &str, payload: &[u8]) -> (StatusCode, Value) {
    let now = Utc::now().timestamp();
    let signature = format!(
        "t={now},v1={}",
        compute_signature(payload, WEBHOOK_SECRET, now)
    );
    let request = Request::post("/api/webhooks/stripe")
        .header("stripe-signature", signature)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_vec()))
        .unwrap();

    let response = app_with_pool(upstream, pool.clone())
        .oneshot(request)
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_redelivered_bundle_purchase_credits_once() {
    let Some(pool) = database().await else {
        return;
    };
    let upstream = MockServer::start().await;
    let retailer = retailer(&pool).await;
    let event_id = unique("evt_bundle");

    let payload = json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "created": Utc::now().timestamp(),
        "data": { "object": {
            "id": unique("cs"),
            "object": "checkout.session",
            "mode": "payment",
            "payment_status": "paid",
            "customer": unique("cus"),
            "client_reference_id": retailer.to_string(),
            "metadata": { "retailer_id": retailer.to_string(), "bundle": "small" }
        }}
    })
    .to_string()
    .into_bytes();

    let (status, body) = deliver_stripe(&pool, &upstream.uri(), &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "applied");

    let (status, body) = deliver_stripe(&pool, &upstream.uri(), &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "duplicate");

    let subscription = SubscriptionRepository::new(&pool)
        .get(retailer, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.state.balance.bundle_remaining, 50);
    assert_eq!(
        ledger(&pool, retailer).await,
        vec![("bundle_purchase".to_string(), 0, 50, Some(event_id))]
    );
}

#[tokio::test]
async fn test_events_for_another_subscription_leave_plan_alone() {
    let Some(pool) = database().await else {
        return;
    };
    let retailer = retailer(&pool).await;
    let subscriptions = SubscriptionRepository::new(&pool);
    let now = Utc::now();

    let created = unique("evt_created");
    let update = SubscriptionUpdate {
        plan: Plan::Starter,
        status: SubscriptionStatus::Active,
        period: BillingPeriod::monthly_from(now),
        cancel_at_period_end: false,
    };
    let effect = subscriptions
        .apply_update(
            retailer,
            "sub_tracked",
            &update,
            EventReceipt {
                id: &created,
                event_type: "customer.subscription.created",
            },
        )
        .await
        .unwrap();
    assert!(matches!(effect, EventEffect::Changed(_)));

    let foreign = unique("evt_deleted");
    let effect = subscriptions
        .cancel(
            retailer,
            "sub_other",
            now,
            EventReceipt {
                id: &foreign,
                event_type: "customer.subscription.deleted",
            },
        )
        .await
        .unwrap();
    assert_eq!(effect, EventEffect::Untracked);
    assert!(stripe_events::is_recorded(&pool, &foreign).await.unwrap());

    let record = subscriptions.get(retailer, now).await.unwrap().unwrap();
    assert_eq!(record.state.plan, Plan::Starter);
    assert_eq!(record.stripe_subscription_id.as_deref(), Some("sub_tracked"));

    // Replaying the first event id changes nothing.
    let effect = subscriptions
        .apply_update(
            retailer,
            "sub_tracked",
            &update,
            EventReceipt {
                id: &created,
                event_type: "customer.subscription.created",
            },
        )
        .await
        .unwrap();
    assert_eq!(effect, EventEffect::Duplicate);
}

#[tokio::test]
async fn test_free_plan_shop_limit_through_router() {
    let Some(pool) = database().await else {
        return;
    };
    let upstream = MockServer::start().await;
    let retailer = retailer(&pool).await;

    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": retailer.to_string(),
            "email": "owner@retail.example.com",
            "app_metadata": { "role": "retailer" }
        })))
        .mount(&upstream)
        .await;

    let app = app_with_pool(&upstream.uri(), pool);
    let mut statuses = Vec::new();
    for name in ["First Shop", "Second Shop"] {
        let request = Request::post("/api/retailer/shops")
            .header("authorization", "Bearer retailer-token")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({ "name": name, "slug": unique("shop") }).to_string(),
            ))
            .unwrap();
        statuses.push(app.clone().oneshot(request).await.unwrap().status());
    }

    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::FORBIDDEN]);
}
