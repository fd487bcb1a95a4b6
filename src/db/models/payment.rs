use serde::Serialize;
use sqlx::{query_as, SqlitePool};
use uuid::Uuid;

use crate::db;
use crate::error::{on_unique_violation, AppError, AppResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentRow {
    pub id: String,
    pub subscription_id: String,
    pub user_id: String,
    pub payment_id: String,
    pub order_id: String,
    pub signature: String,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub payment_method: Option<String>,
    pub paid_at: String,
    pub refund_id: Option<String>,
    pub refund_amount: Option<f64>,
    pub refund_currency: Option<String>,
    pub refund_status: Option<String>,
    pub refund_speed: Option<String>,
    pub refund_receipt: Option<String>,
    pub refund_processed_at: Option<String>,
    pub refund_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundView {
    pub id: String,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub status: Option<String>,
    pub speed_processed: Option<String>,
    pub receipt: Option<String>,
    pub processed_at: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    #[serde(rename = "_id")]
    pub id: String,
    pub subscription: String,
    pub user: String,
    pub payment_id: String,
    pub order_id: String,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub payment_method: Option<String>,
    pub paid_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund: Option<RefundView>,
    pub created_at: String,
    pub updated_at: String,
}

impl PaymentRow {
    pub fn to_view(&self) -> Payment {
        Payment {
            id: self.id.clone(),
            subscription: self.subscription_id.clone(),
            user: self.user_id.clone(),
            payment_id: self.payment_id.clone(),
            order_id: self.order_id.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            status: self.status.clone(),
            payment_method: self.payment_method.clone(),
            paid_at: self.paid_at.clone(),
            refund: self.refund_id.as_ref().map(|id| RefundView {
                id: id.clone(),
                amount: self.refund_amount,
                currency: self.refund_currency.clone(),
                status: self.refund_status.clone(),
                speed_processed: self.refund_speed.clone(),
                receipt: self.refund_receipt.clone(),
                processed_at: self.refund_processed_at.clone(),
                reason: self.refund_reason.clone(),
            }),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }
}

/// Payment joined with the paying customer and the newspaper, for the admin ledger.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentListing {
    #[sqlx(flatten)]
    pub payment: PaymentRow,
    pub user_name: String,
    pub user_email: String,
    pub newspaper_id: String,
    pub newspaper_name: String,
}

impl PaymentListing {
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::json!(self.payment.to_view());
        value["user"] = serde_json::json!({
            "_id": self.payment.user_id,
            "name": self.user_name,
            "email": self.user_email,
        });
        value["subscription"] = serde_json::json!({
            "_id": self.payment.subscription_id,
            "newspaper": { "_id": self.newspaper_id, "name": self.newspaper_name },
        });
        value
    }
}

pub struct CapturedPayment {
    pub subscription_id: String,
    pub user_id: String,
    pub payment_id: String,
    pub order_id: String,
    pub signature: String,
    pub amount: f64,
    pub currency: String,
}

pub struct RefundRecord {
    pub refund_id: String,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub speed: Option<String>,
    pub receipt: Option<String>,
    pub reason: Option<String>,
}

pub struct PaymentRepository;

impl PaymentRepository {
    /// Store a verified capture and activate its subscription atomically.
    pub async fn record_capture(pool: &SqlitePool, p: CapturedPayment) -> AppResult<PaymentRow> {
        let mut tx = pool.begin().await?;
        let now = db::now();

        let row = query_as::<_, PaymentRow>(
            "INSERT INTO payments
                (id, subscription_id, user_id, payment_id, order_id, signature,
                 amount, currency, status, paid_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'captured', ?, ?, ?)
             RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&p.subscription_id)
        .bind(&p.user_id)
        .bind(&p.payment_id)
        .bind(&p.order_id)
        .bind(&p.signature)
        .bind(p.amount)
        .bind(&p.currency)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| on_unique_violation(e, "Payment has already been recorded"))?;

        sqlx::query(
            "UPDATE subscriptions SET status = 'active', payment_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&p.payment_id)
        .bind(&now)
        .bind(&p.subscription_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    pub async fn find_by_payment_id(pool: &SqlitePool, payment_id: &str) -> AppResult<Option<PaymentRow>> {
        let row = query_as::<_, PaymentRow>("SELECT * FROM payments WHERE payment_id = ?")
            .bind(payment_id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    /// Most recent payment for a subscription.
    pub async fn latest_for_subscription(pool: &SqlitePool, subscription_id: &str) -> AppResult<Option<PaymentRow>> {
        let row = query_as::<_, PaymentRow>(
            "SELECT * FROM payments WHERE subscription_id = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(subscription_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn list(pool: &SqlitePool) -> AppResult<Vec<PaymentListing>> {
        let rows = query_as::<_, PaymentListing>(
            "SELECT p.*,
                    u.name  AS user_name,
                    u.email AS user_email,
                    n.id    AS newspaper_id,
                    n.name  AS newspaper_name
             FROM payments p
             JOIN users u ON u.id = p.user_id
             JOIN subscriptions s ON s.id = p.subscription_id
             JOIN newspapers n ON n.id = s.newspaper_id
             ORDER BY p.created_at DESC",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Mark the payment refunded and cancel its subscription in one transaction.
    pub async fn record_refund(pool: &SqlitePool, payment: &PaymentRow, refund: RefundRecord) -> AppResult<PaymentRow> {
        let mut tx = pool.begin().await?;
        let now = db::now();

        let row = query_as::<_, PaymentRow>(
            "UPDATE payments
             SET status = 'refunded',
                 refund_id = ?, refund_amount = ?, refund_currency = ?, refund_status = ?,
                 refund_speed = ?, refund_receipt = ?, refund_processed_at = ?, refund_reason = ?,
                 updated_at = ?
             WHERE id = ? AND status = 'captured'
             RETURNING *",
        )
        .bind(&refund.refund_id)
        .bind(refund.amount)
        .bind(&refund.currency)
        .bind(&refund.status)
        .bind(&refund.speed)
        .bind(&refund.receipt)
        .bind(&now)
        .bind(&refund.reason)
        .bind(&now)
        .bind(&payment.id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::Conflict("Payment has already been refunded".to_string()))?;

        sqlx::query("UPDATE subscriptions SET status = 'cancelled', updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&payment.subscription_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row)
    }
}
