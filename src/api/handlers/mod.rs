pub mod audit_log;
pub mod health;
pub mod metrics;
pub mod newspapers;
pub mod payments;
pub mod subscriptions;
pub mod users;

use axum::http::Uri;

use crate::error::AppError;

/// Fallback for unmatched routes.
pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("Can't find {} on this server!", uri.path()))
}
