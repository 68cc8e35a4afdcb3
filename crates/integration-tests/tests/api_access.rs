//! Authentication, role checks, and request validation through the router.
//!
//! The auth and storage platform is a `wiremock` server; the database is
//! never reached because every request here is decided before a query.

#![allow(clippy::unwrap_used)]

use atelier_integration_tests::app;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONSUMER_ID: &str = "0d3c6a52-7f0e-4b8a-9d61-5a2e8c4b7f10";
const RETAILER_ID: &str = "6b1c4f3e-9f0a-4d2b-8a47-2f4e0c9d1a11";

fn user(id: &str, role: Option<&str>) -> Value {
    let metadata = role.map_or_else(|| json!({}), |r| json!({ "role": r }));
    json!({ "id": id, "email": "someone@example.com", "app_metadata": metadata })
}

async fn platform() -> MockServer {
    let server = MockServer::start().await;

    for (token, body) in [
        ("consumer-token", user(CONSUMER_ID, Some("consumer"))),
        ("retailer-token", user(RETAILER_ID, Some("retailer"))),
        ("roleless-token", user(CONSUMER_ID, None)),
        (
            "self-declared-token",
            json!({
                "id": RETAILER_ID,
                "email": "someone@example.com",
                "user_metadata": { "role": "retailer" }
            }),
        ),
    ] {
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("authorization", format!("Bearer {token}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .and(header("authorization", "Bearer expired-token"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "msg": "JWT expired" })),
        )
        .mount(&server)
        .await;

    server
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn get(uri: &str, token: &str) -> Request<Body> {
    Request::get(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, token: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart(token: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
    let boundary = "atelier-test-boundary";
    let mut body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"me\"\r\n\
         Content-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::post("/api/uploads")
        .header("authorization", format!("Bearer {token}"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn png() -> Vec<u8> {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(&[0u8; 64]);
    bytes
}

#[tokio::test]
async fn test_me_resolves_role_and_caches_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(user(CONSUMER_ID, Some("consumer"))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let app = app(&server.uri());
    for _ in 0..2 {
        let (status, body) = call(app.clone(), get("/api/auth/me", "consumer-token")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], CONSUMER_ID);
        assert_eq!(body["role"], "consumer");
    }
}

#[tokio::test]
async fn test_expired_token_is_unauthorized() {
    let server = platform().await;
    let (status, body) = call(app(&server.uri()), get("/api/auth/me", "expired-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid or expired token");
}

#[tokio::test]
async fn test_account_without_role_is_forbidden() {
    let server = platform().await;
    let (status, _) = call(app(&server.uri()), get("/api/auth/me", "roleless-token")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_self_declared_role_is_ignored() {
    let server = platform().await;
    let (status, _) = call(
        app(&server.uri()),
        get("/api/retailer/dashboard", "self-declared-token"),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_roles_guard_their_areas() {
    let server = platform().await;
    let app = app(&server.uri());

    for uri in [
        "/api/retailer/dashboard",
        "/api/retailer/shops",
        "/api/billing/subscription",
    ] {
        let (status, _) = call(app.clone(), get(uri, "consumer-token")).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
    }

    for uri in ["/api/consumer/profile", "/api/fittings"] {
        let (status, _) = call(app.clone(), get(uri, "retailer-token")).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
    }

    let start = json!({
        "shop": "maison",
        "garment_image_url": "https://cdn.example.com/dress.png",
        "person_image_path": format!("{RETAILER_ID}/me.png"),
    });
    let (status, _) = call(app, post_json("/api/fittings", "retailer-token", &start)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_checkout_rejects_free_and_unknown_plans() {
    let server = platform().await;
    let app = app(&server.uri());

    for plan in ["free", "platinum"] {
        let (status, body) = call(
            app.clone(),
            post_json("/api/billing/checkout", "retailer-token", &json!({ "plan": plan })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{plan}");
        assert!(body["error"].is_string());
    }

    let (status, _) = call(
        app,
        post_json(
            "/api/billing/bundles/checkout",
            "retailer-token",
            &json!({ "bundle": "huge" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_returns_tokens_and_role() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access",
            "refresh_token": "refresh",
            "expires_in": 3600,
            "token_type": "bearer",
            "user": user(RETAILER_ID, Some("retailer")),
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error_description": "Invalid login credentials" })),
        )
        .mount(&server)
        .await;

    let app = app(&server.uri());
    let (status, body) = call(
        app.clone(),
        Request::post("/api/auth/login")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({ "email": "Shop@Example.com", "password": "hunter22hunter" }).to_string(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["access_token"], "access");
    assert_eq!(body["role"], "retailer");
    assert_eq!(body["user_id"], RETAILER_ID);

    let (status, _) = call(
        app,
        Request::post("/api/auth/refresh")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "refresh_token": "stale" }).to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_revokes_session() {
    let server = platform().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .and(header("authorization", "Bearer consumer-token"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let request = Request::post("/api/auth/logout")
        .header("authorization", "Bearer consumer-token")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(app(&server.uri()), request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_upload_validation() {
    let server = platform().await;
    let app = app(&server.uri());

    let (status, _) = call(
        app.clone(),
        multipart("consumer-token", "text/plain", b"hello"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Declared PNG, actually something else.
    let (status, _) = call(
        app.clone(),
        multipart("consumer-token", "image/png", b"GIF89a........"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Just over the file limit, and far beyond the whole-body limit: both
    // answer with the JSON error body.
    for size in [5000, 200 * 1024] {
        let mut oversized = vec![0xFF, 0xD8, 0xFF];
        oversized.resize(size, 0);
        let (status, body) = call(
            app.clone(),
            multipart("consumer-token", "image/jpeg", &oversized),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE, "{size}");
        assert!(body["error"].as_str().unwrap().contains("4096"), "{size}");
    }
}

#[tokio::test]
async fn test_upload_stores_under_user_prefix() {
    let server = platform().await;
    let object = format!(r"^/storage/v1/object/uploads/{CONSUMER_ID}/[0-9a-f-]{{36}}\.png$");
    let signed = format!(r"^/storage/v1/object/sign/uploads/{CONSUMER_ID}/[0-9a-f-]{{36}}\.png$");

    Mock::given(method("POST"))
        .and(path_regex(object.as_str()))
        .and(header("content-type", "image/png"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Key": "ok" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(signed.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "signedURL": "/object/sign/uploads/x.png?token=abc"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (status, body) = call(
        app(&server.uri()),
        multipart("consumer-token", "image/png", &png()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(
        body["path"]
            .as_str()
            .unwrap()
            .starts_with(&format!("{CONSUMER_ID}/"))
    );
    assert_eq!(
        body["url"],
        format!("{}/storage/v1/object/sign/uploads/x.png?token=abc", server.uri())
    );
    assert_eq!(body["expires_in"], 3600);
}

#[tokio::test]
async fn test_start_fitting_validates_images_first() {
    let server = platform().await;
    let app = app(&server.uri());

    let foreign = json!({
        "shop": "maison",
        "garment_image_url": "https://cdn.example.com/dress.png",
        "person_image_path": format!("{RETAILER_ID}/someone-else.png"),
    });
    let (status, _) = call(
        app.clone(),
        post_json("/api/fittings", "consumer-token", &foreign),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let bad_garment = json!({
        "shop": "maison",
        "garment_image_url": "file:///etc/passwd",
        "person_image_path": format!("{CONSUMER_ID}/me.png"),
    });
    let (status, _) = call(app, post_json("/api/fittings", "consumer-token", &bad_garment)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
