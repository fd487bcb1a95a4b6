use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::extract::QueryParams;
use crate::api::middleware::rbac::{require, AdminUser};
use crate::api::AppState;
use crate::auth::rbac::Permission;
use crate::db::audit::AuditEntry;
use crate::error::AppResult;

#[derive(Deserialize)]
pub struct AuditLogParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub resource: Option<String>,
}

/// (page, per_page, offset) with page >= 1 and per_page in 1..=200.
fn page_window(page: Option<i64>, per_page: Option<i64>) -> (i64, i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(50).clamp(1, 200);
    (page, per_page, (page - 1).saturating_mul(per_page))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    QueryParams(params): QueryParams<AuditLogParams>,
) -> AppResult<Json<Value>> {
    require(&admin, Permission::ReadAuditLog)?;

    let (page, per_page, offset) = page_window(params.page, params.per_page);

    let filters: Vec<(&str, &String)> = [
        ("user_id", &params.user_id),
        ("action", &params.action),
        ("resource", &params.resource),
    ]
    .into_iter()
    .filter_map(|(column, value)| value.as_ref().map(|v| (column, v)))
    .collect();

    let where_clause = if filters.is_empty() {
        String::new()
    } else {
        let conditions: Vec<String> = filters.iter().map(|(c, _)| format!("{} = ?", c)).collect();
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM audit_log {}", where_clause);
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
    for (_, v) in &filters {
        count_query = count_query.bind(*v);
    }
    let (total,) = count_query.fetch_one(&state.db).await?;

    let data_sql = format!(
        "SELECT * FROM audit_log {} ORDER BY time DESC, id DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut data_query = sqlx::query_as::<_, AuditEntry>(&data_sql);
    for (_, v) in &filters {
        data_query = data_query.bind(*v);
    }
    let entries = data_query.bind(per_page).bind(offset).fetch_all(&state.db).await?;

    Ok(Json(json!({
        "status": "success",
        "results": entries.len(),
        "total": total,
        "page": page,
        "per_page": per_page,
        "data": { "entries": entries },
    })))
}
