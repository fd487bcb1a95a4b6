use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    AuthFailed(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Too many failed login attempts. Please try again later.")]
    TooManyRequests,

    /// Error reported by an external collaborator, surfaced with its own status.
    #[error("{message}")]
    Upstream { status: u16, message: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn unauthenticated() -> Self {
        AppError::AuthFailed("You are not logged in! Please log in to get access.".to_string())
    }

    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;

        match self {
            AppError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::Conflict(_) => StatusCode::BAD_REQUEST,
            AppError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;
        use serde_json::json;

        let status = self.status_code();
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("database error: {}", e);
                "Something went wrong!".to_string()
            }
            AppError::Json(e) => {
                tracing::error!("serialization error: {}", e);
                "Something went wrong!".to_string()
            }
            // Internal messages are written for callers; the cause is logged where raised.
            _ => self.to_string(),
        };
        let kind = if status.is_client_error() { "fail" } else { "error" };

        (status, Json(json!({ "status": kind, "message": message }))).into_response()
    }
}

/// Map a unique-constraint violation to a 400 with the given message; pass others through.
pub fn on_unique_violation(err: sqlx::Error, message: impl Into<String>) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(message.into()),
        _ => AppError::Database(err),
    }
}

pub type AppResult<T> = Result<T, AppError>;
