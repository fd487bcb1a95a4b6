use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::extract::JsonBody;
use crate::api::handlers::subscriptions::load_for;
use crate::api::middleware::auth::AuthUser;
use crate::api::middleware::rbac::AdminUser;
use crate::api::AppState;
use crate::db::audit::{log_action, Actor};
use crate::db::models::payment::{CapturedPayment, PaymentRepository, RefundRecord};
use crate::db::models::subscription::{Status, SubscriptionRecord, SubscriptionRepository};
use crate::error::{AppError, AppResult};
use crate::gateway::{OrderRequest, RefundRequest};
use crate::sms::notify_best_effort;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    subscription_id: Option<String>,
}

/// Field names follow the gateway's checkout callback.
#[derive(Deserialize)]
pub struct VerifyRequest {
    razorpay_order_id: Option<String>,
    razorpay_payment_id: Option<String>,
    razorpay_signature: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundPaymentRequest {
    payment_id: Option<String>,
    amount: Option<f64>,
    reason: Option<String>,
}

/// Major units to minor units (rupees to paise).
fn to_minor(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

fn to_major(amount: i64) -> f64 {
    amount as f64 / 100.0
}

fn display_amount(amount: f64, currency: &str) -> String {
    match currency {
        "INR" => format!("₹{}", amount),
        other => format!("{} {}", amount, other),
    }
}

fn non_blank<'a>(value: &'a Option<String>) -> Option<&'a str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub async fn create_order(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    JsonBody(req): JsonBody<CreateOrderRequest>,
) -> AppResult<Json<Value>> {
    let id = non_blank(&req.subscription_id)
        .ok_or_else(|| AppError::Validation("Please provide a subscriptionId".to_string()))?;
    let sub = load_for(&state, &user, id, "pay for").await?;

    if sub.status != Status::PendingPayment.as_str() {
        return Err(AppError::Validation(format!(
            "Subscription is not awaiting payment (status: {})",
            sub.status
        )));
    }

    let request = OrderRequest {
        amount: to_minor(sub.amount_due()),
        currency: state.currency.clone(),
        receipt: format!("sub_{}_{}", sub.id, chrono::Utc::now().timestamp_millis()),
        payment_capture: 1,
        notes: BTreeMap::from([
            ("subscriptionId".to_string(), sub.id.clone()),
            ("userId".to_string(), user.id.clone()),
        ]),
    };

    let order = state.gateway.create_order(request).await.map_err(|e| {
        tracing::error!("Payment order creation failed for subscription {}: {}", sub.id, e);
        AppError::Upstream { status: 500, message: "Error creating payment order".to_string() }
    })?;

    SubscriptionRepository::set_order(&state.db, &sub.id, &order.id).await?;
    tracing::info!(subscription = %sub.id, order = %order.id, amount = order.amount, "Payment order created");

    Ok(Json(json!({
        "status": "success",
        "data": { "order": order, "key": state.gateway.key_id() },
    })))
}

async fn notify_capture(state: &AppState, sub: &SubscriptionRecord, amount: f64) {
    let customer_msg = format!(
        "Your payment of {} for {} subscription has been received. Thank you!",
        display_amount(amount, &state.currency),
        sub.newspaper_name
    );
    notify_best_effort(state.sms.as_ref(), &state.metrics, &sub.user_phone, &customer_msg).await;

    if let Some(phone) = &sub.distributor_phone {
        let distributor_msg = format!(
            "New subscription for {} at {}. Customer: {}, Phone: {}",
            sub.newspaper_name,
            sub.address_line(),
            sub.user_name,
            sub.user_phone
        );
        notify_best_effort(state.sms.as_ref(), &state.metrics, phone, &distributor_msg).await;
    }
}

pub async fn verify(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    JsonBody(req): JsonBody<VerifyRequest>,
) -> AppResult<Json<Value>> {
    let (order_id, payment_id, signature) = match (
        non_blank(&req.razorpay_order_id),
        non_blank(&req.razorpay_payment_id),
        non_blank(&req.razorpay_signature),
    ) {
        (Some(o), Some(p), Some(s)) => (o, p, s),
        _ => return Err(AppError::Validation("Missing payment verification details".to_string())),
    };

    let sub = SubscriptionRepository::find_by_order(&state.db, order_id)
        .await?
        .ok_or_else(|| AppError::NotFound("No subscription found for this payment".to_string()))?;
    if user.role == "customer" && sub.user_id != user.id {
        return Err(AppError::Forbidden(
            "You do not have permission to pay for this subscription".to_string(),
        ));
    }

    if !state.gateway.verify_signature(order_id, payment_id, signature)? {
        state.metrics.inc_signature_failure();
        tracing::warn!(subscription = %sub.id, order = %order_id, "Payment signature mismatch");
        return Err(AppError::Validation("Invalid payment signature".to_string()));
    }

    let amount = sub.amount_due();
    PaymentRepository::record_capture(
        &state.db,
        CapturedPayment {
            subscription_id: sub.id.clone(),
            user_id: sub.user_id.clone(),
            payment_id: payment_id.to_string(),
            order_id: order_id.to_string(),
            signature: signature.to_string(),
            amount,
            currency: state.currency.clone(),
        },
    )
    .await?;
    state.metrics.inc_verified();

    log_action(
        state.db.clone(),
        Actor::from(&user),
        "verify",
        "payment",
        Some(payment_id.to_string()),
        Some(format!("subscription={}", sub.id)),
    );

    let sub = SubscriptionRepository::get(&state.db, &sub.id)
        .await?
        .ok_or_else(|| AppError::NotFound("No subscription found with that ID".to_string()))?;
    notify_capture(&state, &sub, amount).await;

    Ok(Json(json!({ "status": "success", "data": { "subscription": sub.to_view() } })))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(subscription_id): Path<String>,
) -> AppResult<Json<Value>> {
    let sub = load_for(&state, &user, &subscription_id, "view payment details for").await?;
    let payment = PaymentRepository::latest_for_subscription(&state.db, &sub.id).await?;

    Ok(Json(json!({
        "status": "success",
        "data": { "payment": payment.map(|p| p.to_view()) },
    })))
}

pub async fn refund(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    JsonBody(req): JsonBody<RefundPaymentRequest>,
) -> AppResult<Json<Value>> {
    let payment_id = non_blank(&req.payment_id)
        .ok_or_else(|| AppError::Validation("Please provide a paymentId".to_string()))?;
    let payment = PaymentRepository::find_by_payment_id(&state.db, payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("No payment found with that ID".to_string()))?;

    match payment.status.as_str() {
        "captured" => {}
        "refunded" => return Err(AppError::Validation("Payment has already been refunded".to_string())),
        other => {
            return Err(AppError::Validation(format!("Cannot refund a payment with status {}", other)))
        }
    }

    let amount = req.amount.unwrap_or(payment.amount);
    if !amount.is_finite() || amount <= 0.0 || amount > payment.amount {
        return Err(AppError::Validation(format!(
            "Refund amount must be greater than 0 and at most {}",
            payment.amount
        )));
    }
    let reason = req
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("Customer request")
        .to_string();

    let refund = state
        .gateway
        .refund(
            payment_id,
            RefundRequest {
                amount: to_minor(amount),
                speed: "normal".to_string(),
                notes: BTreeMap::from([
                    ("reason".to_string(), reason.clone()),
                    ("initiatedBy".to_string(), admin.id.clone()),
                ]),
            },
        )
        .await
        .inspect_err(|e| tracing::error!("Refund of payment {} failed: {}", payment_id, e))?;

    let refunded = to_major(refund.amount);
    PaymentRepository::record_refund(
        &state.db,
        &payment,
        RefundRecord {
            refund_id: refund.id.clone(),
            amount: refunded,
            currency: refund.currency.clone(),
            status: refund.status.clone(),
            speed: refund.speed_processed.clone(),
            receipt: refund.receipt.clone(),
            reason: Some(reason),
        },
    )
    .await?;
    state.metrics.inc_refund();

    log_action(
        state.db.clone(),
        Actor::from(&admin),
        "refund",
        "payment",
        Some(payment_id.to_string()),
        Some(format!("refund={} amount={}", refund.id, refunded)),
    );

    if let Some(sub) = SubscriptionRepository::get(&state.db, &payment.subscription_id).await? {
        let message = format!(
            "A refund of {} for your {} subscription has been processed. Refund ID: {}",
            display_amount(refunded, &refund.currency),
            sub.newspaper_name,
            refund.id
        );
        notify_best_effort(state.sms.as_ref(), &state.metrics, &sub.user_phone, &message).await;
    }

    Ok(Json(json!({ "status": "success", "data": { "refund": refund } })))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> AppResult<Json<Value>> {
    let payments = PaymentRepository::list(&state.db).await?;
    let data: Vec<Value> = payments.iter().map(|p| p.to_json()).collect();

    Ok(Json(json!({
        "status": "success",
        "results": data.len(),
        "data": { "payments": data },
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minor_unit_conversion() {
        assert_eq!(to_minor(300.0), 30_000);
        assert_eq!(to_minor(199.99), 19_999);
        assert_eq!(to_major(12_345), 123.45);
    }

    #[test]
    fn test_display_amount() {
        assert_eq!(display_amount(300.0, "INR"), "₹300");
        assert_eq!(display_amount(12.5, "USD"), "12.5 USD");
    }
}
