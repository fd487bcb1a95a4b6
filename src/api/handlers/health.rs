use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::AppState;
use crate::error::AppResult;

/// Liveness plus a database round-trip.
pub async fn health_check(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    sqlx::query("SELECT 1").execute(&state.db).await?;
    Ok(Json(json!({ "status": "success" })))
}
