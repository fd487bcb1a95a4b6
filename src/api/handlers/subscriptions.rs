use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::extract::JsonBody;
use crate::api::middleware::auth::AuthUser;
use crate::api::middleware::rbac::{require, AdminUser};
use crate::api::AppState;
use crate::auth::rbac::Permission;
use crate::db::models::newspaper::NewspaperRepository;
use crate::db::models::subscription::{
    DeliveryAddress, NewSubscription, Plan, Scope, Status, SubscriptionRecord,
    SubscriptionRepository,
};
use crate::db::models::user::User;
use crate::delivery;
use crate::error::{AppError, AppResult};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    newspaper_id: Option<String>,
    subscription_type: Option<String>,
    delivery_address: Option<DeliveryAddress>,
    delivery_time: Option<String>,
}

/// Only these fields may change after creation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSubscriptionRequest {
    delivery_address: Option<DeliveryAddress>,
    delivery_time: Option<String>,
    status: Option<String>,
}

fn not_found() -> AppError {
    AppError::NotFound("No subscription found with that ID".to_string())
}

fn delivery_time(value: Option<&str>) -> AppResult<String> {
    value
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .ok_or_else(|| AppError::Validation("Please specify delivery time".to_string()))
}

/// Load a subscription and check a customer caller owns it.
pub(crate) async fn load_for(
    state: &AppState,
    user: &User,
    id: &str,
    action: &str,
) -> AppResult<SubscriptionRecord> {
    let sub = SubscriptionRepository::get(&state.db, id).await?.ok_or_else(not_found)?;
    if user.role == "customer" && sub.user_id != user.id {
        return Err(AppError::Forbidden(format!(
            "You do not have permission to {} this subscription",
            action
        )));
    }
    Ok(sub)
}

fn subscription_json(sub: &SubscriptionRecord) -> Json<Value> {
    Json(json!({ "status": "success", "data": { "subscription": sub.to_view() } }))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    JsonBody(req): JsonBody<CreateSubscriptionRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    require(&user, Permission::CreateSubscription)?;

    let newspaper_id = req
        .newspaper_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Subscription must belong to a newspaper".to_string()))?;
    let plan = match req.subscription_type.as_deref() {
        None => Plan::Monthly,
        Some(t) => Plan::parse(t).ok_or_else(|| {
            AppError::Validation(format!(
                "Invalid subscription type: {}. Must be one of: monthly, quarterly, yearly",
                t
            ))
        })?,
    };
    let time = delivery_time(req.delivery_time.as_deref())?;
    let address = req.delivery_address.unwrap_or_default();
    let location = address
        .location
        .as_ref()
        .ok_or_else(|| AppError::Validation("Please provide a delivery location".to_string()))?;
    location.validate()?;

    let newspaper = NewspaperRepository::get(&state.db, newspaper_id)
        .await?
        .ok_or_else(|| AppError::NotFound("No newspaper found with that ID".to_string()))?;

    let start = Utc::now();
    let end = plan.end_date(start)?;

    let distributor_id = delivery::nearest_distributor(&state.db, location, state.max_distance_meters)
        .await?
        .ok_or_else(|| AppError::Validation("No distributor available in your area".to_string()))?;

    let id = SubscriptionRepository::create(
        &state.db,
        NewSubscription {
            user_id: user.id.clone(),
            newspaper_id: newspaper.id,
            plan,
            start_date: start,
            end_date: end,
            delivery_address: address,
            delivery_time: time,
            distributor_id,
        },
    )
    .await?;
    state.metrics.inc_subscription();

    let sub = SubscriptionRepository::get(&state.db, &id).await?.ok_or_else(not_found)?;
    tracing::info!(subscription = %sub.id, customer = %user.id, plan = plan.as_str(), "Subscription created");
    Ok((StatusCode::CREATED, subscription_json(&sub)))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<Value>> {
    let scope = match user.role.as_str() {
        "customer" => Scope::Customer(user.id.clone()),
        "distributor" => Scope::Distributor(user.id.clone()),
        _ => Scope::All,
    };
    let subs = SubscriptionRepository::list(&state.db, &scope).await?;
    let data: Vec<Value> = subs.iter().map(|s| json!(s.to_view())).collect();

    Ok(Json(json!({
        "status": "success",
        "results": data.len(),
        "data": { "subscriptions": data },
    })))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let sub = load_for(&state, &user, &id, "view").await?;
    Ok(subscription_json(&sub))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<UpdateSubscriptionRequest>,
) -> AppResult<Json<Value>> {
    require(&user, Permission::ModifySubscription)?;
    let sub = load_for(&state, &user, &id, "update").await?;

    let status = match req.status.as_deref() {
        None => Status::parse(&sub.status).unwrap_or(Status::PendingPayment),
        Some(s) => Status::parse(s)
            .ok_or_else(|| AppError::Validation(format!("Invalid status: {}", s)))?,
    };
    if user.role == "customer" && req.status.is_some() && status != Status::Cancelled {
        return Err(AppError::Forbidden(
            "Customers may only change a subscription's status to cancelled".to_string(),
        ));
    }

    let time = match req.delivery_time.as_deref() {
        Some(t) => delivery_time(Some(t))?,
        None => sub.delivery_time.clone(),
    };

    let mut distributor = sub.distributor_id.clone();
    let address = match req.delivery_address {
        None => sub.delivery_address(),
        Some(mut address) => {
            match &address.location {
                Some(location) => {
                    location.validate()?;
                    // Keep the current distributor when nobody is in range of the new address.
                    if let Some(d) =
                        delivery::nearest_distributor(&state.db, location, state.max_distance_meters).await?
                    {
                        distributor = Some(d);
                    }
                }
                None => address.location = sub.delivery_address().location,
            }
            address
        }
    };

    SubscriptionRepository::update_delivery(
        &state.db,
        &sub.id,
        &address,
        &time,
        status,
        distributor.as_deref(),
    )
    .await?;

    let sub = SubscriptionRepository::get(&state.db, &id).await?.ok_or_else(not_found)?;
    Ok(subscription_json(&sub))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    require(&user, Permission::ModifySubscription)?;
    let sub = load_for(&state, &user, &id, "cancel").await?;

    SubscriptionRepository::set_status(&state.db, &sub.id, Status::Cancelled).await?;
    tracing::info!(subscription = %sub.id, by = %user.id, "Subscription cancelled");

    let sub = SubscriptionRepository::get(&state.db, &id).await?.ok_or_else(not_found)?;
    Ok(subscription_json(&sub))
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> AppResult<Json<Value>> {
    let stats = SubscriptionRepository::stats(&state.db).await?;
    Ok(Json(json!({ "status": "success", "data": { "stats": stats } })))
}
