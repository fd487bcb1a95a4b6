use serde::Serialize;
use sqlx::{query_as, SqlitePool};
use uuid::Uuid;

use crate::auth::rbac::Role;
use crate::db;
use crate::delivery::GeoPoint;
use crate::error::{on_unique_violation, AppError, AppResult};

const DUPLICATE_EMAIL: &str = "An account with that email already exists";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub role: String,
    pub active: bool,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub password_changed_at: Option<String>,
    pub password_reset_token: Option<String>,
    pub password_reset_expires: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Public view of a user; credentials and reset state never leave the server.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub role: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn location(&self) -> Option<GeoPoint> {
        match (self.longitude, self.latitude) {
            (Some(lng), Some(lat)) => Some(GeoPoint::new(lng, lat)),
            _ => None,
        }
    }

    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            role: self.role.clone(),
            active: self.active,
            location: self.location(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }

    /// True when the password was changed after the token was issued.
    pub fn changed_password_after(&self, token_iat: usize) -> bool {
        self.password_changed_at
            .as_deref()
            .and_then(db::parse_timestamp)
            .map(|t| t.timestamp() > token_iat as i64)
            .unwrap_or(false)
    }
}

pub struct NewUser {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password_hash: String,
    pub role: Role,
    pub location: Option<GeoPoint>,
}

/// Profile fields that may change without touching credentials.
#[derive(Debug, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
    pub location: Option<GeoPoint>,
}

pub struct UserRepository;

impl UserRepository {
    pub async fn get(pool: &SqlitePool, id: &str) -> AppResult<Option<User>> {
        let row = query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    pub async fn find_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<User>> {
        let row = query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email.trim().to_lowercase())
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    pub async fn list(pool: &SqlitePool) -> AppResult<Vec<User>> {
        let rows = query_as::<_, User>("SELECT * FROM users ORDER BY created_at DESC")
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    pub async fn create(pool: &SqlitePool, new: NewUser) -> AppResult<User> {
        let id = Uuid::new_v4().to_string();
        let now = db::now();
        let (lng, lat) = new
            .location
            .as_ref()
            .map(|p| (Some(p.longitude()), Some(p.latitude())))
            .unwrap_or((None, None));

        query_as::<_, User>(
            "INSERT INTO users
                (id, name, email, phone, password, role, active, longitude, latitude,
                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&id)
        .bind(new.name.trim())
        .bind(new.email.trim().to_lowercase())
        .bind(new.phone.trim())
        .bind(&new.password_hash)
        .bind(new.role.as_str())
        .bind(lng)
        .bind(lat)
        .bind(&now)
        .bind(&now)
        .fetch_one(pool)
        .await
        .map_err(|e| on_unique_violation(e, DUPLICATE_EMAIL))
    }

    pub async fn update(pool: &SqlitePool, id: &str, changes: UserChanges) -> AppResult<User> {
        let existing = Self::get(pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound("No user found with that ID".to_string()))?;

        let name = changes.name.map(|n| n.trim().to_string()).unwrap_or(existing.name);
        let email = changes
            .email
            .map(|e| e.trim().to_lowercase())
            .unwrap_or(existing.email);
        let phone = changes.phone.map(|p| p.trim().to_string()).unwrap_or(existing.phone);
        let role = changes
            .role
            .map(|r| r.as_str().to_string())
            .unwrap_or(existing.role);
        let active = changes.active.unwrap_or(existing.active);
        let (lng, lat) = match changes.location {
            Some(p) => (Some(p.longitude()), Some(p.latitude())),
            None => (existing.longitude, existing.latitude),
        };

        query_as::<_, User>(
            "UPDATE users
             SET name = ?, email = ?, phone = ?, role = ?, active = ?,
                 longitude = ?, latitude = ?, updated_at = ?
             WHERE id = ?
             RETURNING *",
        )
        .bind(&name)
        .bind(&email)
        .bind(&phone)
        .bind(&role)
        .bind(active)
        .bind(lng)
        .bind(lat)
        .bind(db::now())
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(|e| on_unique_violation(e, DUPLICATE_EMAIL))
    }

    /// Store a new password hash, stamp the change, and clear any reset token.
    pub async fn set_password(pool: &SqlitePool, id: &str, password_hash: &str) -> AppResult<User> {
        // Backdated by a second so a token issued right after the change stays valid.
        let changed_at = db::timestamp(chrono::Utc::now() - chrono::Duration::seconds(1));

        let row = query_as::<_, User>(
            "UPDATE users
             SET password = ?, password_changed_at = ?,
                 password_reset_token = NULL, password_reset_expires = NULL, updated_at = ?
             WHERE id = ?
             RETURNING *",
        )
        .bind(password_hash)
        .bind(&changed_at)
        .bind(db::now())
        .bind(id)
        .fetch_optional(pool)
        .await?;

        row.ok_or_else(|| AppError::NotFound("No user found with that ID".to_string()))
    }

    pub async fn set_reset_token(
        pool: &SqlitePool,
        id: &str,
        token_digest: Option<&str>,
        expires: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE users SET password_reset_token = ?, password_reset_expires = ? WHERE id = ?",
        )
        .bind(token_digest)
        .bind(expires)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_reset_token(pool: &SqlitePool, digest: &str) -> AppResult<Option<User>> {
        let row = query_as::<_, User>("SELECT * FROM users WHERE password_reset_token = ?")
            .bind(digest)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    pub async fn count_active_admins(pool: &SqlitePool) -> AppResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'admin' AND active = 1")
                .fetch_one(pool)
                .await?;
        Ok(count)
    }

    pub async fn deactivate(pool: &SqlitePool, id: &str) -> AppResult<()> {
        sqlx::query("UPDATE users SET active = 0, updated_at = ? WHERE id = ?")
            .bind(db::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(d) if d.is_foreign_key_violation() => AppError::Conflict(
                    "User has subscriptions or payments; deactivate the account instead".to_string(),
                ),
                _ => AppError::Database(e),
            })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("No user found with that ID".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> User {
        User {
            id: "u1".into(),
            name: "Asha".into(),
            email: "asha@example.com".into(),
            phone: "+919800000001".into(),
            password: "$argon2id$secret".into(),
            role: "distributor".into(),
            active: true,
            longitude: Some(72.8777),
            latitude: Some(19.0760),
            password_changed_at: None,
            password_reset_token: Some("digest".into()),
            password_reset_expires: None,
            created_at: "2024-01-01T00:00:00.000Z".into(),
            updated_at: "2024-01-01T00:00:00.000Z".into(),
        }
    }

    #[test]
    fn test_public_view_hides_credentials() {
        let json = serde_json::to_value(sample().to_public()).unwrap();
        assert_eq!(json["_id"], "u1");
        assert_eq!(json["location"]["coordinates"][0], 72.8777);
        assert!(json.get("password").is_none());
        assert!(json.get("passwordResetToken").is_none());
    }

    #[test]
    fn test_changed_password_after() {
        let mut user = sample();
        assert!(!user.changed_password_after(0));

        user.password_changed_at = Some("2024-06-01T00:00:00.000Z".into());
        let changed = crate::db::parse_timestamp("2024-06-01T00:00:00.000Z").unwrap().timestamp() as usize;
        assert!(user.changed_password_after(changed - 10));
        assert!(!user.changed_password_after(changed + 10));
    }
}
