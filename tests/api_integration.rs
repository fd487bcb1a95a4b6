//! API integration tests.
//!
//! Every test drives the full router with `oneshot` against a fresh in-memory
//! database. The payment gateway and SMS provider are replaced by in-process
//! doubles so checkout and notifications can be observed.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use dashmap::DashMap;
use http_body_util::BodyExt; // for .collect()
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt; // for .oneshot()

use newsdesk::api::{build_app, build_cors_layer, AppState};
use newsdesk::auth::rbac::Role;
use newsdesk::db::models::newspaper::{NewspaperInput, NewspaperRepository};
use newsdesk::db::models::subscription::Plan;
use newsdesk::db::models::user::{NewUser, User, UserRepository};
use newsdesk::delivery::GeoPoint;
use newsdesk::error::{AppError, AppResult};
use newsdesk::gateway::{signature, Order, OrderRequest, PaymentGateway, Refund, RefundRequest};
use newsdesk::metrics::PlatformMetrics;
use newsdesk::sms::{MessageReceipt, SmsSender};

const TEST_SECRET: &str = "integration-test-secret-at-least-32-chars";
const GATEWAY_SECRET: &str = "stub-gateway-secret";
const PASSWORD: &str = "correct-horse";

// Mumbai, and a point roughly 2 km north of it.
const HOME: (f64, f64) = (72.8777, 19.0760);
const NEAR: (f64, f64) = (72.8777, 19.0940);
// Pune, well outside a 10 km radius.
const FAR: (f64, f64) = (73.8567, 18.5204);

// ── Test doubles ───────────────────────────────────────────────────────────────

struct StubGateway {
    orders: AtomicU64,
}

#[async_trait]
impl PaymentGateway for StubGateway {
    fn key_id(&self) -> &str {
        "stub_key"
    }

    fn verify_signature(&self, order_id: &str, payment_id: &str, sig: &str) -> AppResult<bool> {
        signature::verify(GATEWAY_SECRET, order_id, payment_id, sig)
    }

    async fn create_order(&self, request: OrderRequest) -> AppResult<Order> {
        let n = self.orders.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Order {
            id: format!("order_stub_{}", n),
            amount: request.amount,
            currency: request.currency,
            receipt: Some(request.receipt),
            status: Some("created".into()),
        })
    }

    async fn refund(&self, _payment_id: &str, request: RefundRequest) -> AppResult<Refund> {
        Ok(Refund {
            id: "rfnd_stub_1".into(),
            amount: request.amount,
            currency: "INR".into(),
            status: "processed".into(),
            speed_processed: Some("normal".into()),
            receipt: None,
        })
    }
}

#[derive(Default)]
struct RecordingSms {
    sent: Mutex<Vec<(String, String)>>,
    fail: std::sync::atomic::AtomicBool,
}

impl RecordingSms {
    fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    fn record(&self, to: &str, body: &str) -> AppResult<MessageReceipt> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(AppError::Upstream { status: 503, message: "provider down".into() });
        }
        self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
        Ok(MessageReceipt { sid: "SM_test".into(), status: Some("queued".into()) })
    }
}

#[async_trait]
impl SmsSender for RecordingSms {
    async fn send_sms(&self, to: &str, body: &str) -> AppResult<MessageReceipt> {
        self.record(to, body)
    }
}

// ── Harness ────────────────────────────────────────────────────────────────────

struct TestApp {
    app: Router,
    db: SqlitePool,
    sms: Arc<RecordingSms>,
    metrics: Arc<PlatformMetrics>,
}

/// In-memory database; a single long-lived connection so every query sees the same data.
async fn setup_db() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("valid url")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("Failed to create in-memory SQLite pool");

    sqlx::migrate!("./src/db/migrations")
        .run(&pool)
        .await
        .expect("Migration failed");

    pool
}

async fn build_test_app() -> TestApp {
    let db = setup_db().await;
    let sms = Arc::new(RecordingSms::default());
    let metrics = Arc::new(PlatformMetrics::default());

    let state = Arc::new(AppState {
        db: db.clone(),
        jwt_secret: TEST_SECRET.to_string(),
        jwt_expiry_hours: 1,
        currency: "INR".to_string(),
        max_distance_meters: 10_000.0,
        gateway: Arc::new(StubGateway { orders: AtomicU64::new(0) }),
        sms: sms.clone(),
        metrics: metrics.clone(),
        login_attempts: DashMap::new(),
    });

    let app = build_app(state, build_cors_layer(&[]));
    TestApp { app, db, sms, metrics }
}

async fn create_user(db: &SqlitePool, role: Role, email: &str, at: Option<(f64, f64)>) -> (User, String) {
    let user = UserRepository::create(
        db,
        NewUser {
            name: format!("{} user", role.as_str()),
            email: email.to_string(),
            phone: format!("+9198{:08}", email.len() * 1_000 + role as usize),
            password_hash: newsdesk::auth::password::hash(PASSWORD).unwrap(),
            role,
            location: at.map(|(lng, lat)| GeoPoint::new(lng, lat)),
        },
    )
    .await
    .expect("create user");

    let token = newsdesk::auth::jwt::generate(&user.id, &user.email, &user.role, TEST_SECRET, 1)
        .expect("token");
    (user, token)
}

fn newspaper_body(name: &str) -> Value {
    json!({
        "name": name,
        "description": "City news every morning",
        "publisher": "Ledger Group",
        "languages": ["English"],
        "categories": ["daily"],
        "price": { "monthly": 300, "quarterly": 850, "yearly": 3200 },
        "coverImage": "https://img.example/cover.jpg"
    })
}

async fn create_newspaper(db: &SqlitePool, name: &str) -> String {
    let input: NewspaperInput = serde_json::from_value(newspaper_body(name)).unwrap();
    NewspaperRepository::create(db, input.into_new().unwrap())
        .await
        .expect("create newspaper")
        .id
}

async fn send(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
    }
    let req = match body {
        Some(b) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    (status, body_json(resp).await)
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
}

fn subscription_body(newspaper_id: &str, at: (f64, f64)) -> Value {
    json!({
        "newspaperId": newspaper_id,
        "subscriptionType": "monthly",
        "deliveryAddress": {
            "street": "12 Marine Drive",
            "city": "Mumbai",
            "state": "MH",
            "pincode": "400020",
            "location": { "type": "Point", "coordinates": [at.0, at.1], "address": "12 Marine Drive, Mumbai" }
        },
        "deliveryTime": "06:30"
    })
}

/// A customer with a pending subscription served by a nearby distributor.
struct Scenario {
    customer: User,
    customer_token: String,
    distributor: User,
    admin_token: String,
    subscription_id: String,
}

async fn scenario(t: &TestApp) -> Scenario {
    let (customer, customer_token) = create_user(&t.db, Role::Customer, "cust@example.com", None).await;
    let (distributor, _) = create_user(&t.db, Role::Distributor, "dist@example.com", Some(NEAR)).await;
    let (_, admin_token) = create_user(&t.db, Role::Admin, "boss@example.com", None).await;
    let paper = create_newspaper(&t.db, "The Daily Ledger").await;

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/v1/subscriptions",
        Some(&customer_token),
        Some(subscription_body(&paper, HOME)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    Scenario {
        subscription_id: body["data"]["subscription"]["_id"].as_str().unwrap().to_string(),
        customer,
        customer_token,
        distributor,
        admin_token,
    }
}

async fn subscription_status(db: &SqlitePool, id: &str) -> String {
    let (status,): (String,) = sqlx::query_as("SELECT status FROM subscriptions WHERE id = ?")
        .bind(id)
        .fetch_one(db)
        .await
        .unwrap();
    status
}

// ── Basics ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_check() {
    let t = build_test_app().await;
    let (status, body) = send(&t.app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
}

#[tokio::test]
async fn test_unknown_route_uses_error_envelope() {
    let t = build_test_app().await;
    let (status, body) = send(&t.app, Method::GET, "/api/v1/nothing-here", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "fail");
    assert_eq!(body["message"], "Can't find /api/v1/nothing-here on this server!");
}

#[tokio::test]
async fn test_malformed_json_is_400() {
    let t = build_test_app().await;
    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/users/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = t.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "fail");
}

// ── Users & auth ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_signup_then_login() {
    let t = build_test_app().await;
    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/v1/users/signup",
        None,
        Some(json!({
            "name": "Meera",
            "email": "Meera@Example.com",
            "phone": "+919812345678",
            "password": PASSWORD,
            "passwordConfirm": PASSWORD
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert!(body["token"].is_string());
    assert_eq!(body["data"]["user"]["email"], "meera@example.com");
    assert_eq!(body["data"]["user"]["role"], "customer");
    assert!(body["data"]["user"].get("password").is_none());

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/v1/users/login",
        None,
        Some(json!({ "email": "meera@example.com", "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = send(&t.app, Method::GET, "/api/v1/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["name"], "Meera");
}

#[tokio::test]
async fn test_signup_validation() {
    let t = build_test_app().await;
    let base = json!({
        "name": "Meera",
        "email": "meera@example.com",
        "phone": "+919812345678",
        "password": PASSWORD,
        "passwordConfirm": PASSWORD
    });

    let mut admin = base.clone();
    admin["role"] = json!("admin");
    let (status, _) = send(&t.app, Method::POST, "/api/v1/users/signup", None, Some(admin)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut mismatch = base.clone();
    mismatch["passwordConfirm"] = json!("something-else");
    let (status, body) = send(&t.app, Method::POST, "/api/v1/users/signup", None, Some(mismatch)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Passwords are not the same!");

    let mut bad_email = base.clone();
    bad_email["email"] = json!("not-an-email");
    let (status, _) = send(&t.app, Method::POST, "/api/v1/users/signup", None, Some(bad_email)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&t.app, Method::POST, "/api/v1/users/signup", None, Some(base.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(&t.app, Method::POST, "/api/v1/users/signup", None, Some(base)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "An account with that email already exists");
}

#[tokio::test]
async fn test_login_failures_and_throttling() {
    let t = build_test_app().await;
    create_user(&t.db, Role::Customer, "cust@example.com", None).await;

    let (status, _) = send(&t.app, Method::POST, "/api/v1/users/login", None, Some(json!({ "email": "cust@example.com" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for _ in 0..5 {
        let (status, body) = send(
            &t.app,
            Method::POST,
            "/api/v1/users/login",
            None,
            Some(json!({ "email": "cust@example.com", "password": "wrong-password" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Incorrect email or password");
    }

    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/v1/users/login",
        None,
        Some(json!({ "email": "cust@example.com", "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let t = build_test_app().await;
    let (status, body) = send(&t.app, Method::GET, "/api/v1/users/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "fail");

    let (status, _) = send(&t.app, Method::GET, "/api/v1/users/me", Some("garbage.token.value"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_deactivated_user_token_rejected() {
    let t = build_test_app().await;
    let (_, token) = create_user(&t.db, Role::Customer, "cust@example.com", None).await;

    let (status, _) = send(&t.app, Method::DELETE, "/api/v1/users/deleteMe", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&t.app, Method::GET, "/api/v1/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_routes_reject_others() {
    let t = build_test_app().await;
    let (_, customer) = create_user(&t.db, Role::Customer, "cust@example.com", None).await;
    let (_, admin) = create_user(&t.db, Role::Admin, "boss@example.com", None).await;

    for uri in ["/api/v1/users", "/api/v1/payments", "/api/v1/subscriptions/stats/subscription-stats", "/api/v1/audit-log"] {
        let (status, _) = send(&t.app, Method::GET, uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        let (status, _) = send(&t.app, Method::GET, uri, Some(&customer), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        let (status, _) = send(&t.app, Method::GET, uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
    }
}

#[tokio::test]
async fn test_update_me_rejects_password_fields() {
    let t = build_test_app().await;
    let (_, token) = create_user(&t.db, Role::Customer, "cust@example.com", None).await;

    let (status, _) = send(
        &t.app,
        Method::PATCH,
        "/api/v1/users/updateMe",
        Some(&token),
        Some(json!({ "password": "new-password-123" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &t.app,
        Method::PATCH,
        "/api/v1/users/updateMe",
        Some(&token),
        Some(json!({ "name": "Renamed", "role": "admin" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["name"], "Renamed");
    assert_eq!(body["data"]["user"]["role"], "customer");
}

#[tokio::test]
async fn test_update_my_password() {
    let t = build_test_app().await;
    let (_, token) = create_user(&t.db, Role::Customer, "cust@example.com", None).await;

    let (status, _) = send(
        &t.app,
        Method::PATCH,
        "/api/v1/users/updateMyPassword",
        Some(&token),
        Some(json!({ "passwordCurrent": "not-it", "password": "brand-new-pass", "passwordConfirm": "brand-new-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &t.app,
        Method::PATCH,
        "/api/v1/users/updateMyPassword",
        Some(&token),
        Some(json!({ "passwordCurrent": PASSWORD, "password": "brand-new-pass", "passwordConfirm": "brand-new-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].is_string());

    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/v1/users/login",
        None,
        Some(json!({ "email": "cust@example.com", "password": "brand-new-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_forgot_and_reset_password() {
    let t = build_test_app().await;
    let (user, _) = create_user(&t.db, Role::Customer, "cust@example.com", None).await;

    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/v1/users/forgotPassword",
        None,
        Some(json!({ "email": "nobody@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/v1/users/forgotPassword",
        None,
        Some(json!({ "email": "cust@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let messages = t.sms.messages();
    let (to, text) = messages.last().expect("reset token sent");
    assert_eq!(to, &user.phone);
    let token = text
        .split_whitespace()
        .map(|w| w.trim_end_matches('.'))
        .find(|w| w.len() == 32 && w.chars().all(|c| c.is_ascii_hexdigit()))
        .map(String::from)
        .expect("token in message");

    let (status, _) = send(
        &t.app,
        Method::PATCH,
        "/api/v1/users/resetPassword/not-a-token",
        None,
        Some(json!({ "password": "reset-password-1", "passwordConfirm": "reset-password-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &t.app,
        Method::PATCH,
        &format!("/api/v1/users/resetPassword/{}", token),
        None,
        Some(json!({ "password": "reset-password-1", "passwordConfirm": "reset-password-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["token"].is_string());

    // Tokens are single-use.
    let (status, _) = send(
        &t.app,
        Method::PATCH,
        &format!("/api/v1/users/resetPassword/{}", token),
        None,
        Some(json!({ "password": "reset-password-2", "passwordConfirm": "reset-password-2" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_forgot_password_sms_failure_clears_token() {
    let t = build_test_app().await;
    let (user, _) = create_user(&t.db, Role::Customer, "cust@example.com", None).await;
    t.sms.set_failing(true);

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/v1/users/forgotPassword",
        None,
        Some(json!({ "email": "cust@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "error");

    let stored = UserRepository::get(&t.db, &user.id).await.unwrap().unwrap();
    assert!(stored.password_reset_token.is_none());
}

#[tokio::test]
async fn test_cannot_demote_last_admin() {
    let t = build_test_app().await;
    let (admin, token) = create_user(&t.db, Role::Admin, "boss@example.com", None).await;

    let (status, _) = send(
        &t.app,
        Method::PATCH,
        &format!("/api/v1/users/{}", admin.id),
        Some(&token),
        Some(json!({ "role": "customer" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&t.app, Method::DELETE, &format!("/api/v1/users/{}", admin.id), Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── Newspapers ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_newspaper_crud() {
    let t = build_test_app().await;
    let (_, admin) = create_user(&t.db, Role::Admin, "boss@example.com", None).await;
    let (_, customer) = create_user(&t.db, Role::Customer, "cust@example.com", None).await;

    let (status, _) = send(&t.app, Method::POST, "/api/v1/newspapers", Some(&customer), Some(newspaper_body("The Ledger"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&t.app, Method::POST, "/api/v1/newspapers", Some(&admin), Some(newspaper_body("The Ledger"))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id = body["data"]["newspaper"]["_id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["newspaper"]["ratingsAverage"], 4.5);
    assert!(body["data"]["newspaper"].get("isActive").is_none());

    let (status, body) = send(&t.app, Method::POST, "/api/v1/newspapers", Some(&admin), Some(newspaper_body("The Ledger"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "A newspaper with that name already exists");

    let mut bad_rating = newspaper_body("Another Paper");
    bad_rating["ratingsAverage"] = json!(6);
    let (status, _) = send(&t.app, Method::POST, "/api/v1/newspapers", Some(&admin), Some(bad_rating)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &t.app,
        Method::PATCH,
        &format!("/api/v1/newspapers/{}", id),
        Some(&admin),
        Some(json!({ "price": { "monthly": 350 } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["newspaper"]["price"]["monthly"], 350.0);
    assert_eq!(body["data"]["newspaper"]["price"]["yearly"], 3200.0);

    let (status, _) = send(&t.app, Method::DELETE, &format!("/api/v1/newspapers/{}", id), Some(&admin), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&t.app, Method::GET, &format!("/api/v1/newspapers/{}", id), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_newspaper_listing_search_and_stats() {
    let t = build_test_app().await;
    create_newspaper(&t.db, "Morning Ledger").await;
    create_newspaper(&t.db, "Evening Courier").await;

    let (status, body) = send(&t.app, Method::GET, "/api/v1/newspapers?sort=name&limit=1", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], 1);
    assert_eq!(body["data"]["newspapers"][0]["name"], "Evening Courier");

    let (status, _) = send(&t.app, Method::GET, "/api/v1/newspapers/search", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&t.app, Method::GET, "/api/v1/newspapers/search?search=ledger", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], 1);
    assert_eq!(body["data"]["newspapers"][0]["name"], "Morning Ledger");

    let (status, body) = send(&t.app, Method::GET, "/api/v1/newspapers?category=sports", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], 0);

    let (status, body) = send(&t.app, Method::GET, "/api/v1/newspapers/stats", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["stats"][0]["numNewspapers"], 2);
    assert_eq!(body["data"]["stats"][0]["avgMonthlyPrice"], 300.0);
}

// ── Subscriptions ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_subscription_assigns_nearest_distributor() {
    let t = build_test_app().await;
    let (_, token) = create_user(&t.db, Role::Customer, "cust@example.com", None).await;
    let (near, _) = create_user(&t.db, Role::Distributor, "near@example.com", Some(NEAR)).await;
    create_user(&t.db, Role::Distributor, "far@example.com", Some(FAR)).await;
    let paper = create_newspaper(&t.db, "The Daily Ledger").await;

    let (status, body) = send(&t.app, Method::POST, "/api/v1/subscriptions", Some(&token), Some(subscription_body(&paper, HOME))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let sub = &body["data"]["subscription"];
    assert_eq!(sub["status"], "pending_payment");
    assert_eq!(sub["distributor"]["_id"], near.id.as_str());
    assert_eq!(sub["newspaper"]["name"], "The Daily Ledger");
    assert_eq!(sub["deliveryAddress"]["location"]["coordinates"][0], HOME.0);

    let start = newsdesk::db::parse_timestamp(sub["startDate"].as_str().unwrap()).unwrap();
    let expected_end = newsdesk::db::timestamp(Plan::Monthly.end_date(start).unwrap());
    assert_eq!(sub["endDate"], expected_end.as_str());
}

#[tokio::test]
async fn test_create_subscription_without_distributor_in_range() {
    let t = build_test_app().await;
    let (_, token) = create_user(&t.db, Role::Customer, "cust@example.com", None).await;
    create_user(&t.db, Role::Distributor, "far@example.com", Some(FAR)).await;
    let paper = create_newspaper(&t.db, "The Daily Ledger").await;

    let (status, body) = send(&t.app, Method::POST, "/api/v1/subscriptions", Some(&token), Some(subscription_body(&paper, HOME))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No distributor available in your area");

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subscriptions").fetch_one(&t.db).await.unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_create_subscription_validation() {
    let t = build_test_app().await;
    let (_, token) = create_user(&t.db, Role::Customer, "cust@example.com", None).await;
    let (_, admin) = create_user(&t.db, Role::Admin, "boss@example.com", None).await;
    create_user(&t.db, Role::Distributor, "dist@example.com", Some(NEAR)).await;
    let paper = create_newspaper(&t.db, "The Daily Ledger").await;

    let (status, _) = send(&t.app, Method::POST, "/api/v1/subscriptions", Some(&token), Some(subscription_body("missing", HOME))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mut no_time = subscription_body(&paper, HOME);
    no_time["deliveryTime"] = json!("  ");
    let (status, _) = send(&t.app, Method::POST, "/api/v1/subscriptions", Some(&token), Some(no_time)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&t.app, Method::POST, "/api/v1/subscriptions", Some(&admin), Some(subscription_body(&paper, HOME))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_subscription_visibility_by_role() {
    let t = build_test_app().await;
    let s = scenario(&t).await;
    let (_, other) = create_user(&t.db, Role::Customer, "other@example.com", None).await;
    let dist_token = newsdesk::auth::jwt::generate(&s.distributor.id, &s.distributor.email, "distributor", TEST_SECRET, 1).unwrap();

    let uri = format!("/api/v1/subscriptions/{}", s.subscription_id);
    let (status, _) = send(&t.app, Method::GET, &uri, Some(&other), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&t.app, Method::GET, &uri, Some(&s.customer_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["subscription"]["user"]["_id"], s.customer.id.as_str());

    let (_, body) = send(&t.app, Method::GET, "/api/v1/subscriptions", Some(&other), None).await;
    assert_eq!(body["results"], 0);
    let (_, body) = send(&t.app, Method::GET, "/api/v1/subscriptions", Some(&dist_token), None).await;
    assert_eq!(body["results"], 1);
    let (_, body) = send(&t.app, Method::GET, "/api/v1/subscriptions", Some(&s.admin_token), None).await;
    assert_eq!(body["results"], 1);

    let (_, body) = send(&t.app, Method::GET, "/api/v1/users/my-subscriptions", Some(&s.customer_token), None).await;
    assert_eq!(body["results"], 1);

    let (status, _) = send(&t.app, Method::GET, &format!("/api/v1/subscriptions/{}", "missing"), Some(&s.admin_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_customer_may_only_cancel() {
    let t = build_test_app().await;
    let s = scenario(&t).await;
    let uri = format!("/api/v1/subscriptions/{}", s.subscription_id);

    let (status, _) = send(&t.app, Method::PATCH, &uri, Some(&s.customer_token), Some(json!({ "status": "active" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(subscription_status(&t.db, &s.subscription_id).await, "pending_payment");

    let (status, body) = send(&t.app, Method::PATCH, &uri, Some(&s.customer_token), Some(json!({ "deliveryTime": "07:00" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["subscription"]["deliveryTime"], "07:00");
    assert_eq!(body["data"]["subscription"]["status"], "pending_payment");

    let (status, body) = send(&t.app, Method::DELETE, &uri, Some(&s.customer_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["subscription"]["status"], "cancelled");

    let (status, _) = send(&t.app, Method::PATCH, &uri, Some(&s.admin_token), Some(json!({ "status": "expired" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(subscription_status(&t.db, &s.subscription_id).await, "expired");
}

#[tokio::test]
async fn test_subscription_stats() {
    let t = build_test_app().await;
    let s = scenario(&t).await;

    let (status, body) = send(&t.app, Method::GET, "/api/v1/subscriptions/stats/subscription-stats", Some(&s.admin_token), None).await;
    assert_eq!(status, StatusCode::OK);
    let row = &body["data"]["stats"][0];
    assert_eq!(row["newspaper"], "The Daily Ledger");
    assert_eq!(row["nSubscriptions"], 1);
    // One calendar month is 28-31 days.
    let ms = row["minDuration"].as_i64().unwrap();
    assert!((28 * 86_400_000..=31 * 86_400_000).contains(&ms), "{ms}");
}

// ── Payments ───────────────────────────────────────────────────────────────────

async fn create_order(t: &TestApp, s: &Scenario) -> String {
    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/v1/payments/create-order",
        Some(&s.customer_token),
        Some(json!({ "subscriptionId": s.subscription_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["key"], "stub_key");
    assert_eq!(body["data"]["order"]["amount"], 30_000);
    body["data"]["order"]["id"].as_str().unwrap().to_string()
}

async fn verify(t: &TestApp, s: &Scenario, order_id: &str, payment_id: &str, sig: &str) -> (StatusCode, Value) {
    send(
        &t.app,
        Method::POST,
        "/api/v1/payments/verify",
        Some(&s.customer_token),
        Some(json!({
            "razorpay_order_id": order_id,
            "razorpay_payment_id": payment_id,
            "razorpay_signature": sig
        })),
    )
    .await
}

#[tokio::test]
async fn test_verify_rejects_bad_signature() {
    let t = build_test_app().await;
    let s = scenario(&t).await;
    let order_id = create_order(&t, &s).await;

    let forged = signature::sign("wrong-secret", &order_id, "pay_1").unwrap();
    let (status, body) = verify(&t, &s, &order_id, "pay_1", &forged).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid payment signature");

    assert_eq!(subscription_status(&t.db, &s.subscription_id).await, "pending_payment");
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM payments").fetch_one(&t.db).await.unwrap();
    assert_eq!(count, 0);
    assert!(t.sms.messages().is_empty());
}

#[tokio::test]
async fn test_verify_activates_subscription_and_notifies() {
    let t = build_test_app().await;
    let s = scenario(&t).await;
    let order_id = create_order(&t, &s).await;

    let sig = signature::sign(GATEWAY_SECRET, &order_id, "pay_1").unwrap();
    let (status, body) = verify(&t, &s, &order_id, "pay_1", &sig).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["subscription"]["status"], "active");
    assert_eq!(body["data"]["subscription"]["payment"], "pay_1");

    let (status, body) = send(
        &t.app,
        Method::GET,
        &format!("/api/v1/payments/{}", s.subscription_id),
        Some(&s.customer_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["payment"]["status"], "captured");
    assert_eq!(body["data"]["payment"]["amount"], 300.0);

    let recipients: Vec<String> = t.sms.messages().into_iter().map(|(to, _)| to).collect();
    assert!(recipients.contains(&s.customer.phone));
    assert!(recipients.contains(&s.distributor.phone));

    // Already paid: a second order is refused.
    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/v1/payments/create-order",
        Some(&s.customer_token),
        Some(json!({ "subscriptionId": s.subscription_id })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let metrics = t.metrics.to_prometheus_text();
    assert!(metrics.contains("newsdesk_payments_total{result=\"verified\"} 1\n"));
}

#[tokio::test]
async fn test_verify_succeeds_when_sms_fails() {
    let t = build_test_app().await;
    let s = scenario(&t).await;
    let order_id = create_order(&t, &s).await;
    t.sms.set_failing(true);

    let sig = signature::sign(GATEWAY_SECRET, &order_id, "pay_1").unwrap();
    let (status, _) = verify(&t, &s, &order_id, "pay_1", &sig).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(subscription_status(&t.db, &s.subscription_id).await, "active");
}

#[tokio::test]
async fn test_verify_unknown_order() {
    let t = build_test_app().await;
    let s = scenario(&t).await;
    let (status, _) = verify(&t, &s, "order_missing", "pay_1", "00").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_other_customer_cannot_pay_or_view_payment() {
    let t = build_test_app().await;
    let s = scenario(&t).await;
    let (_, other) = create_user(&t.db, Role::Customer, "other@example.com", None).await;

    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/v1/payments/create-order",
        Some(&other),
        Some(json!({ "subscriptionId": s.subscription_id })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&t.app, Method::GET, &format!("/api/v1/payments/{}", s.subscription_id), Some(&other), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_refund_cancels_subscription() {
    let t = build_test_app().await;
    let s = scenario(&t).await;
    let order_id = create_order(&t, &s).await;
    let sig = signature::sign(GATEWAY_SECRET, &order_id, "pay_1").unwrap();
    verify(&t, &s, &order_id, "pay_1", &sig).await;

    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/v1/payments/refund",
        Some(&s.customer_token),
        Some(json!({ "paymentId": "pay_1" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/v1/payments/refund",
        Some(&s.admin_token),
        Some(json!({ "paymentId": "pay_1", "amount": 1000 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/v1/payments/refund",
        Some(&s.admin_token),
        Some(json!({ "paymentId": "pay_1", "reason": "Moved away" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["refund"]["id"], "rfnd_stub_1");
    assert_eq!(body["data"]["refund"]["amount"], 30_000);
    assert_eq!(subscription_status(&t.db, &s.subscription_id).await, "cancelled");

    let (_, body) = send(&t.app, Method::GET, "/api/v1/payments", Some(&s.admin_token), None).await;
    let payment = &body["data"]["payments"][0];
    assert_eq!(payment["status"], "refunded");
    assert_eq!(payment["refund"]["amount"], 300.0);
    assert_eq!(payment["user"]["email"], "cust@example.com");
    assert_eq!(payment["subscription"]["newspaper"]["name"], "The Daily Ledger");

    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/v1/payments/refund",
        Some(&s.admin_token),
        Some(json!({ "paymentId": "pay_1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/v1/payments/refund",
        Some(&s.admin_token),
        Some(json!({ "paymentId": "pay_unknown" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── Distribution & observability ───────────────────────────────────────────────

#[tokio::test]
async fn test_distribution_list_shows_active_deliveries() {
    let t = build_test_app().await;
    let s = scenario(&t).await;
    let dist_token = newsdesk::auth::jwt::generate(&s.distributor.id, &s.distributor.email, "distributor", TEST_SECRET, 1).unwrap();

    let (status, _) = send(&t.app, Method::GET, "/api/v1/users/my-distribution-list", Some(&s.customer_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = send(&t.app, Method::GET, "/api/v1/users/my-distribution-list", Some(&dist_token), None).await;
    assert_eq!(body["results"], 0, "pending subscriptions are not delivered yet");

    let order_id = create_order(&t, &s).await;
    let sig = signature::sign(GATEWAY_SECRET, &order_id, "pay_1").unwrap();
    verify(&t, &s, &order_id, "pay_1", &sig).await;

    let (status, body) = send(&t.app, Method::GET, "/api/v1/users/my-distribution-list", Some(&dist_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], 1);
    let entry = &body["data"]["subscriptions"][0];
    assert_eq!(entry["user"]["phone"], s.customer.phone.as_str());
    assert_eq!(entry["deliveryAddress"]["pincode"], "400020");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = build_test_app().await;
    scenario(&t).await;

    let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let resp = t.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("newsdesk_subscriptions_created_total 1\n"));
}

#[tokio::test]
async fn test_audit_log_records_admin_actions() {
    let t = build_test_app().await;
    let (_, admin) = create_user(&t.db, Role::Admin, "boss@example.com", None).await;

    let (status, _) = send(&t.app, Method::POST, "/api/v1/newspapers", Some(&admin), Some(newspaper_body("Audited Times"))).await;
    assert_eq!(status, StatusCode::CREATED);

    // Audit writes are fire-and-forget; give the spawned task a moment.
    let mut found = Value::Null;
    for _ in 0..50 {
        let (_, body) = send(&t.app, Method::GET, "/api/v1/audit-log?resource=newspaper", Some(&admin), None).await;
        if body["total"] == 1 {
            found = body;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(found["data"]["entries"][0]["action"], "create");
    assert_eq!(found["data"]["entries"][0]["email"], "boss@example.com");
}
