//! Payment gateway client.
//!
//! Orders and refunds go through [`PaymentGateway`]; the live implementation
//! talks to a Razorpay-compatible REST API, and [`MockGateway`] stands in when
//! no credentials are configured.

pub mod signature;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::PaymentsConfig;
use crate::error::{AppError, AppResult};

const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Key id handed to clients when orders are mocked.
pub const MOCK_KEY_ID: &str = "test_key";
/// Secret used to sign and verify mocked checkouts.
pub const MOCK_KEY_SECRET: &str = "test_secret";

#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    /// Minor currency units (paise).
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub payment_capture: u8,
    pub notes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundRequest {
    /// Minor currency units (paise).
    pub amount: i64,
    pub speed: String,
    pub notes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub speed_processed: Option<String>,
    #[serde(default)]
    pub receipt: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Public key id the client needs to open checkout.
    fn key_id(&self) -> &str;

    /// Check a checkout signature with this gateway's secret.
    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> AppResult<bool>;

    async fn create_order(&self, request: OrderRequest) -> AppResult<Order>;

    async fn refund(&self, payment_id: &str, request: RefundRequest) -> AppResult<Refund>;
}

/// Build the gateway described by the config: live when credentials are set, mocked otherwise.
pub fn from_config(cfg: &PaymentsConfig) -> anyhow::Result<Arc<dyn PaymentGateway>> {
    match cfg.credentials() {
        Some((key_id, key_secret)) => {
            tracing::info!("Payment gateway configured ({})", cfg.base_url);
            Ok(Arc::new(RazorpayGateway::new(&cfg.base_url, key_id, key_secret)?))
        }
        None => {
            tracing::warn!("Payment gateway not configured; orders will be mocked");
            Ok(Arc::new(MockGateway::new(&cfg.currency)))
        }
    }
}

pub struct RazorpayGateway {
    base_url: String,
    key_id: String,
    key_secret: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    description: Option<String>,
}

impl RazorpayGateway {
    pub fn new(base_url: &str, key_id: &str, key_secret: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("newsdesk/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
            http,
        })
    }

    async fn post<B: Serialize, T: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> AppResult<T> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Upstream {
                status: 502,
                message: format!("Payment gateway request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let description = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error.description)
                .unwrap_or_else(|| format!("Payment gateway returned {}", status));
            return Err(AppError::Upstream { status: status.as_u16(), message: description });
        }

        response.json::<T>().await.map_err(|e| AppError::Upstream {
            status: 502,
            message: format!("Unexpected payment gateway response: {}", e),
        })
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> AppResult<bool> {
        signature::verify(&self.key_secret, order_id, payment_id, signature)
    }

    async fn create_order(&self, request: OrderRequest) -> AppResult<Order> {
        self.post("/v1/orders", &request).await
    }

    async fn refund(&self, payment_id: &str, request: RefundRequest) -> AppResult<Refund> {
        self.post(&format!("/v1/payments/{}/refund", payment_id), &request).await
    }
}

/// `order_test_<millis>_<8 hex>`; the suffix keeps same-millisecond orders apart.
fn mock_order_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("order_test_{}_{}", chrono::Utc::now().timestamp_millis(), &suffix[..8])
}

/// Local stand-in: issues `order_test_*` orders and refuses refunds.
pub struct MockGateway {
    currency: String,
}

impl MockGateway {
    pub fn new(currency: &str) -> Self {
        Self { currency: currency.to_string() }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn key_id(&self) -> &str {
        MOCK_KEY_ID
    }

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> AppResult<bool> {
        signature::verify(MOCK_KEY_SECRET, order_id, payment_id, signature)
    }

    async fn create_order(&self, request: OrderRequest) -> AppResult<Order> {
        let order = Order {
            id: mock_order_id(),
            amount: request.amount,
            currency: if request.currency.is_empty() { self.currency.clone() } else { request.currency },
            receipt: Some(request.receipt),
            status: Some("created".to_string()),
        };
        tracing::info!(order = %order.id, amount = order.amount, "Mock payment order created");
        Ok(order)
    }

    async fn refund(&self, _payment_id: &str, _request: RefundRequest) -> AppResult<Refund> {
        Err(AppError::Upstream {
            status: 500,
            message: "Payment gateway is not configured".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_request() -> OrderRequest {
        OrderRequest {
            amount: 30_000,
            currency: "INR".into(),
            receipt: "sub_1_1700000000000".into(),
            payment_capture: 1,
            notes: BTreeMap::from([("subscriptionId".to_string(), "1".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_mock_order_shape() {
        let gw = MockGateway::new("INR");
        let order = gw.create_order(order_request()).await.unwrap();
        assert!(order.id.starts_with("order_test_"));
        assert_eq!(order.amount, 30_000);
        assert_eq!(order.receipt.as_deref(), Some("sub_1_1700000000000"));
        assert_eq!(gw.key_id(), "test_key");
    }

    #[tokio::test]
    async fn test_mock_order_ids_are_unique() {
        let gw = MockGateway::new("INR");
        let mut ids = std::collections::HashSet::new();
        for _ in 0..20 {
            ids.insert(gw.create_order(order_request()).await.unwrap().id);
        }
        assert_eq!(ids.len(), 20);
    }

    #[tokio::test]
    async fn test_mock_refuses_refunds() {
        let gw = MockGateway::new("INR");
        let req = RefundRequest { amount: 100, speed: "normal".into(), notes: BTreeMap::new() };
        let err = gw.refund("pay_1", req).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Payment gateway is not configured");
    }

    #[test]
    fn test_mock_verifies_with_mock_secret() {
        let gw = MockGateway::new("INR");
        let sig = signature::sign(MOCK_KEY_SECRET, "order_test_1", "pay_1").unwrap();
        assert!(gw.verify_signature("order_test_1", "pay_1", &sig).unwrap());
        assert!(!gw.verify_signature("order_test_1", "pay_2", &sig).unwrap());
    }

    #[test]
    fn test_order_request_serializes_capture_flag() {
        let json = serde_json::to_value(order_request()).unwrap();
        assert_eq!(json["payment_capture"], 1);
        assert_eq!(json["notes"]["subscriptionId"], "1");
    }
}
