use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::sync::Arc;
use crate::auth::rbac::{has_permission, Permission};
use crate::db::models::user::User;
use crate::error::{AppError, AppResult};
use crate::api::AppState;
use super::auth::AuthUser;

const FORBIDDEN: &str = "You do not have permission to perform this action";

/// 403 unless the user's role grants `permission`.
pub fn require(user: &User, permission: Permission) -> AppResult<()> {
    if has_permission(&user.role, &permission) {
        Ok(())
    } else {
        Err(AppError::Forbidden(FORBIDDEN.to_string()))
    }
}

/// Axum extractor that requires the `admin` role.
/// Anonymous callers get 401, other roles 403.
pub struct AdminUser(pub User);

impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if user.role == "admin" {
            Ok(AdminUser(user))
        } else {
            Err(AppError::Forbidden(FORBIDDEN.to_string()))
        }
    }
}
