use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::extract::JsonBody;
use crate::api::middleware::auth::AuthUser;
use crate::api::middleware::rbac::{require, AdminUser};
use crate::api::validators::{EmailValidator, PhoneValidator, Validator};
use crate::api::AppState;
use crate::auth::password;
use crate::auth::rbac::{Permission, Role};
use crate::db;
use crate::db::audit::{log_action, Actor};
use crate::db::models::subscription::{Scope, SubscriptionRepository};
use crate::db::models::user::{NewUser, User, UserChanges, UserRepository};
use crate::delivery::GeoPoint;
use crate::error::{AppError, AppResult};

const MAX_LOGIN_FAILURES: u32 = 5;
const LOGIN_WINDOW: Duration = Duration::from_secs(15 * 60);
const RESET_TOKEN_MINUTES: i64 = 10;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    password: Option<String>,
    password_confirm: Option<String>,
    role: Option<String>,
    location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    email: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    password: Option<String>,
    password_confirm: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    password_current: Option<String>,
    password: Option<String>,
    password_confirm: Option<String>,
}

/// Profile changes. Password fields are accepted only to reject them.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    location: Option<GeoPoint>,
    role: Option<String>,
    active: Option<bool>,
    password: Option<Value>,
    password_confirm: Option<Value>,
}

fn required<'a>(value: &'a Option<String>, message: &str) -> AppResult<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(message.to_string()))
}

fn parse_role(role: &str) -> AppResult<Role> {
    Role::parse(role).ok_or_else(|| {
        AppError::Validation(format!(
            "Invalid role: {}. Must be one of: customer, distributor, admin",
            role
        ))
    })
}

fn hash_password(plain: &str) -> AppResult<String> {
    password::hash(plain).map_err(|e| AppError::Internal(e.to_string()))
}

/// Validate signup-style input into a `NewUser`; `allow_admin` gates the admin role.
fn new_user_from(req: SignupRequest, allow_admin: bool) -> AppResult<NewUser> {
    let name = required(&req.name, "Please tell us your name!")?.to_string();
    let email = required(&req.email, "Please provide your email")?.to_string();
    EmailValidator::new().validate(&email)?;
    let phone = required(&req.phone, "Please provide your phone number")?.to_string();
    PhoneValidator::new().validate(&phone)?;

    let plain = required(&req.password, "Please provide a password")?;
    password::check_new(plain, req.password_confirm.as_deref().unwrap_or_default())?;

    let role = match req.role.as_deref() {
        None => Role::Customer,
        Some(r) => parse_role(r)?,
    };
    if role == Role::Admin && !allow_admin {
        return Err(AppError::Validation("You cannot sign up as an admin".to_string()));
    }

    if let Some(loc) = &req.location {
        loc.validate()?;
    }

    Ok(NewUser {
        name,
        email,
        phone,
        password_hash: hash_password(plain)?,
        role,
        location: req.location,
    })
}

fn issue_token(state: &AppState, user: &User) -> AppResult<String> {
    crate::auth::jwt::generate(
        &user.id,
        &user.email,
        &user.role,
        &state.jwt_secret,
        state.jwt_expiry_hours,
    )
    .map_err(|e| AppError::Internal(e.to_string()))
}

fn token_response(state: &AppState, user: &User) -> AppResult<Json<Value>> {
    let token = issue_token(state, user)?;
    Ok(Json(json!({
        "status": "success",
        "token": token,
        "data": { "user": user.to_public() },
    })))
}

type LoginAttempts = DashMap<String, (u32, Instant)>;

fn throttled(attempts: &LoginAttempts, key: &str) -> bool {
    attempts
        .get(key)
        .map(|entry| {
            let (count, started) = *entry;
            count >= MAX_LOGIN_FAILURES && started.elapsed() < LOGIN_WINDOW
        })
        .unwrap_or(false)
}

/// Drop every tracker whose window has passed.
fn evict_expired(attempts: &LoginAttempts, window: Duration) {
    attempts.retain(|_, (_, started)| started.elapsed() < window);
}

fn record_login_failure(attempts: &LoginAttempts, key: &str) {
    evict_expired(attempts, LOGIN_WINDOW);
    attempts.entry(key.to_string()).or_insert((0, Instant::now())).0 += 1;
}

fn reject_password_fields(req: &UpdateProfileRequest) -> AppResult<()> {
    if req.password.is_some() || req.password_confirm.is_some() {
        return Err(AppError::Validation(
            "This route is not for password updates. Please use /updateMyPassword.".to_string(),
        ));
    }
    Ok(())
}

fn profile_changes(req: UpdateProfileRequest, allow_admin_fields: bool) -> AppResult<UserChanges> {
    reject_password_fields(&req)?;

    if let Some(name) = &req.name {
        if name.trim().is_empty() {
            return Err(AppError::Validation("Please tell us your name!".to_string()));
        }
    }
    if let Some(email) = &req.email {
        EmailValidator::new().validate(email)?;
    }
    if let Some(phone) = &req.phone {
        PhoneValidator::new().validate(phone)?;
    }
    if let Some(loc) = &req.location {
        loc.validate()?;
    }

    let (role, active) = if allow_admin_fields {
        (req.role.as_deref().map(parse_role).transpose()?, req.active)
    } else {
        (None, None)
    };

    Ok(UserChanges {
        name: req.name,
        email: req.email,
        phone: req.phone,
        role,
        active,
        location: req.location,
    })
}

// ── Authentication ──────────────────────────────────────────────

pub async fn signup(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<SignupRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let new = new_user_from(req, false)?;
    let user = UserRepository::create(&state.db, new).await?;
    tracing::info!(user = %user.id, role = %user.role, "New account created");
    Ok((StatusCode::CREATED, token_response(&state, &user)?))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> AppResult<Json<Value>> {
    let (email, plain) = match (req.email.as_deref(), req.password.as_deref()) {
        (Some(e), Some(p)) if !e.trim().is_empty() && !p.is_empty() => (e.trim().to_lowercase(), p),
        _ => return Err(AppError::Validation("Please provide email and password!".to_string())),
    };

    if throttled(&state.login_attempts, &email) {
        tracing::warn!("Login throttled for {}", email);
        return Err(AppError::TooManyRequests);
    }

    let user = UserRepository::find_by_email(&state.db, &email)
        .await?
        .filter(|u| u.active && password::verify(plain, &u.password));

    let Some(user) = user else {
        record_login_failure(&state.login_attempts, &email);
        return Err(AppError::AuthFailed("Incorrect email or password".to_string()));
    };

    state.login_attempts.remove(&email);
    token_response(&state, &user)
}

pub async fn logout() -> AppResult<Json<Value>> {
    // Tokens are stateless; the client discards its copy.
    Ok(Json(json!({ "status": "success" })))
}

pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<ForgotPasswordRequest>,
) -> AppResult<Json<Value>> {
    let email = required(&req.email, "Please provide your email")?;
    let user = UserRepository::find_by_email(&state.db, email)
        .await?
        .ok_or_else(|| AppError::NotFound("There is no user with that email address.".to_string()))?;

    let (token, digest) = password::reset_token();
    let expires = db::timestamp(Utc::now() + chrono::Duration::minutes(RESET_TOKEN_MINUTES));
    UserRepository::set_reset_token(&state.db, &user.id, Some(&digest), Some(&expires)).await?;

    let message = format!(
        "Your password reset token is {}. It is valid for {} minutes.",
        token, RESET_TOKEN_MINUTES
    );
    if let Err(e) = state.sms.send_sms(&user.phone, &message).await {
        tracing::warn!("Failed to send reset token to user {}: {}", user.id, e);
        UserRepository::set_reset_token(&state.db, &user.id, None, None).await?;
        return Err(AppError::Upstream {
            status: 500,
            message: "There was an error sending the reset token. Try again later!".to_string(),
        });
    }

    Ok(Json(json!({ "status": "success", "message": "Token sent to your phone!" })))
}

pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    JsonBody(req): JsonBody<ResetPasswordRequest>,
) -> AppResult<Json<Value>> {
    let invalid = || AppError::Validation("Token is invalid or has expired".to_string());

    let digest = password::digest_reset_token(&token);
    let user = UserRepository::find_by_reset_token(&state.db, &digest)
        .await?
        .ok_or_else(invalid)?;
    let unexpired = user
        .password_reset_expires
        .as_deref()
        .and_then(db::parse_timestamp)
        .is_some_and(|t| t > Utc::now());
    if !unexpired {
        return Err(invalid());
    }

    let plain = required(&req.password, "Please provide a password")?;
    password::check_new(plain, req.password_confirm.as_deref().unwrap_or_default())?;
    let user = UserRepository::set_password(&state.db, &user.id, &hash_password(plain)?).await?;

    token_response(&state, &user)
}

// ── Current user ────────────────────────────────────────────────

pub async fn me(AuthUser(user): AuthUser) -> AppResult<Json<Value>> {
    Ok(Json(json!({ "status": "success", "data": { "user": user.to_public() } })))
}

pub async fn update_my_password(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    JsonBody(req): JsonBody<UpdatePasswordRequest>,
) -> AppResult<Json<Value>> {
    let current = req.password_current.as_deref().unwrap_or_default();
    if !password::verify(current, &user.password) {
        return Err(AppError::AuthFailed("Your current password is wrong.".to_string()));
    }

    let plain = required(&req.password, "Please provide a password")?;
    password::check_new(plain, req.password_confirm.as_deref().unwrap_or_default())?;
    let user = UserRepository::set_password(&state.db, &user.id, &hash_password(plain)?).await?;

    token_response(&state, &user)
}

pub async fn update_me(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    JsonBody(req): JsonBody<UpdateProfileRequest>,
) -> AppResult<Json<Value>> {
    let changes = profile_changes(req, false)?;
    let user = UserRepository::update(&state.db, &user.id, changes).await?;
    Ok(Json(json!({ "status": "success", "data": { "user": user.to_public() } })))
}

pub async fn delete_me(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> AppResult<StatusCode> {
    UserRepository::deactivate(&state.db, &user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn my_subscriptions(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<Value>> {
    let subs = SubscriptionRepository::list(&state.db, &Scope::Customer(user.id)).await?;
    let data: Vec<Value> = subs.iter().map(|s| json!(s.to_view())).collect();
    Ok(Json(json!({
        "status": "success",
        "results": data.len(),
        "data": { "subscriptions": data },
    })))
}

pub async fn my_distribution_list(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<Value>> {
    require(&user, Permission::ViewDistributionList)?;
    let subs = SubscriptionRepository::distribution_list(&state.db, &user.id).await?;
    let data: Vec<Value> = subs.iter().map(|s| json!(s.to_view())).collect();
    Ok(Json(json!({
        "status": "success",
        "results": data.len(),
        "data": { "subscriptions": data },
    })))
}

// ── Administration ──────────────────────────────────────────────

pub async fn list(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> AppResult<Json<Value>> {
    let users = UserRepository::list(&state.db).await?;
    let data: Vec<Value> = users.iter().map(|u| json!(u.to_public())).collect();
    Ok(Json(json!({
        "status": "success",
        "results": data.len(),
        "data": { "users": data },
    })))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    JsonBody(req): JsonBody<SignupRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let new = new_user_from(req, true)?;
    let user = UserRepository::create(&state.db, new).await?;

    log_action(
        state.db.clone(),
        Actor::from(&admin),
        "create",
        "user",
        Some(user.id.clone()),
        Some(format!("role={}", user.role)),
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "data": { "user": user.to_public() } })),
    ))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let user = UserRepository::get(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("No user found with that ID".to_string()))?;
    Ok(Json(json!({ "status": "success", "data": { "user": user.to_public() } })))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<UpdateProfileRequest>,
) -> AppResult<Json<Value>> {
    let changes = profile_changes(req, true)?;
    let existing = UserRepository::get(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("No user found with that ID".to_string()))?;

    let loses_admin = existing.role == "admin"
        && existing.active
        && (changes.role.is_some_and(|r| r != Role::Admin) || changes.active == Some(false));
    if loses_admin && UserRepository::count_active_admins(&state.db).await? <= 1 {
        return Err(AppError::Validation(
            "Cannot demote or deactivate the last active admin".to_string(),
        ));
    }

    let detail = changes.role.map(|r| format!("role: {} -> {}", existing.role, r.as_str()));
    let user = UserRepository::update(&state.db, &id, changes).await?;

    log_action(state.db.clone(), Actor::from(&admin), "update", "user", Some(id), detail);

    Ok(Json(json!({ "status": "success", "data": { "user": user.to_public() } })))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let existing = UserRepository::get(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("No user found with that ID".to_string()))?;

    if existing.role == "admin"
        && existing.active
        && UserRepository::count_active_admins(&state.db).await? <= 1
    {
        return Err(AppError::Validation("Cannot delete the last active admin".to_string()));
    }

    UserRepository::delete(&state.db, &id).await?;
    log_action(
        state.db.clone(),
        Actor::from(&admin),
        "delete",
        "user",
        Some(id),
        Some(existing.email),
    );

    Ok(StatusCode::NO_CONTENT)
}
