use crate::db::models::user::User;
use crate::db::DbPool;

/// Who performed an audited action.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub email: String,
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self { user_id: user.id.clone(), email: user.email.clone() }
    }
}

/// Record an audit entry without blocking the request.
pub fn log_action(
    db: DbPool,
    actor: Actor,
    action: impl Into<String> + Send + 'static,
    resource: impl Into<String> + Send + 'static,
    resource_id: Option<String>,
    detail: Option<String>,
) {
    let action = action.into();
    let resource = resource.into();
    let now = crate::db::now();

    tokio::spawn(async move {
        let result = sqlx::query(
            "INSERT INTO audit_log (time, user_id, email, action, resource, resource_id, detail)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&now)
        .bind(&actor.user_id)
        .bind(&actor.email)
        .bind(&action)
        .bind(&resource)
        .bind(resource_id.as_deref())
        .bind(detail.as_deref())
        .execute(&db)
        .await;

        if let Err(e) = result {
            tracing::warn!("Failed to write audit entry {action} {resource}: {e}");
        }
    });
}

#[derive(Debug, serde::Serialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub time: String,
    pub user_id: String,
    pub email: String,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub detail: Option<String>,
}
