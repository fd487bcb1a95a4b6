use axum::{
    extract::FromRequestParts,
    http::request::Parts,
};
use std::sync::Arc;
use crate::db::models::user::{User, UserRepository};
use crate::error::AppError;
use crate::api::AppState;

/// Authenticated caller, loaded fresh from the database.
///
/// The bearer token must verify, and its user must still exist, be active,
/// and not have changed their password after the token was issued.
pub struct AuthUser(pub User);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(AppError::unauthenticated)?;

        let claims = crate::auth::jwt::verify(token, &state.jwt_secret)
            .map_err(|_| AppError::AuthFailed("Invalid token. Please log in again!".to_string()))?;

        let user = UserRepository::get(&state.db, &claims.sub)
            .await?
            .filter(|u| u.active)
            .ok_or_else(|| {
                AppError::AuthFailed("The user belonging to this token does no longer exist.".to_string())
            })?;

        if user.changed_password_after(claims.iat) {
            return Err(AppError::AuthFailed(
                "User recently changed password! Please log in again.".to_string(),
            ));
        }

        Ok(AuthUser(user))
    }
}
