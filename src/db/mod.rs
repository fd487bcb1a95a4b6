use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use std::str::FromStr;
use crate::config::Config;

pub mod models;
pub mod audit;

pub type DbPool = SqlitePool;

pub const DEFAULT_ADMIN_EMAIL: &str = "admin@newsdesk.local";
const DEFAULT_ADMIN_PASSWORD: &str = "change-me-now";

pub async fn init(cfg: &Config) -> Result<DbPool> {
    let db_url = format!("sqlite://{}?mode=rwc", cfg.database.path);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(
            sqlx::sqlite::SqliteConnectOptions::from_str(&db_url)?
                .create_if_missing(true)
                .foreign_keys(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal),
        )
        .await?;

    sqlx::migrate!("./src/db/migrations").run(&pool).await?;

    tracing::info!("Database connected: {}", cfg.database.path);
    Ok(pool)
}

/// Timestamp format used for every stored date: RFC 3339, millisecond precision, `Z` suffix.
/// Lexicographic order matches chronological order, and SQLite's date functions parse it.
pub fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now() -> String {
    timestamp(Utc::now())
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc))
}

/// Create a default admin user if no users exist yet.
pub async fn seed_admin(pool: &DbPool) -> Result<()> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    if count == 0 {
        let password = crate::auth::password::hash(DEFAULT_ADMIN_PASSWORD)?;
        let admin = models::user::NewUser {
            name: "Administrator".to_string(),
            email: DEFAULT_ADMIN_EMAIL.to_string(),
            phone: "+910000000000".to_string(),
            password_hash: password,
            role: crate::auth::rbac::Role::Admin,
            location: None,
        };
        models::user::UserRepository::create(pool, admin)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to seed admin user: {}", e))?;

        tracing::warn!(
            "Created default admin user (email: {}, password: {}). \
             Change immediately in production!",
            DEFAULT_ADMIN_EMAIL,
            DEFAULT_ADMIN_PASSWORD
        );
    }

    Ok(())
}

/// Insert the bundled sample catalogue when no newspapers exist.
pub async fn seed_newspapers(pool: &DbPool) -> Result<usize> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM newspapers")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(0);
    }

    let samples: Vec<models::newspaper::NewspaperInput> =
        serde_json::from_str(include_str!("seed/newspapers.json"))?;
    let total = samples.len();
    for input in samples {
        let paper = input
            .into_new()
            .map_err(|e| anyhow::anyhow!("Invalid sample newspaper: {}", e))?;
        models::newspaper::NewspaperRepository::create(pool, paper)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to seed newspaper: {}", e))?;
    }

    tracing::info!("Seeded {} sample newspapers", total);
    Ok(total)
}
