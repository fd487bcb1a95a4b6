use serde::{Deserialize, Serialize};
use sqlx::{query_as, SqlitePool};
use uuid::Uuid;

use crate::db;
use crate::error::{on_unique_violation, AppError, AppResult};

pub const CATEGORIES: &[&str] = &[
    "daily", "weekly", "monthly", "business", "sports", "entertainment", "technology", "politics",
];

const DUPLICATE_NAME: &str = "A newspaper with that name already exists";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NewspaperRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub publisher: String,
    pub languages: String,   // JSON array as string
    pub categories: String,  // JSON array as string
    pub price_monthly: f64,
    pub price_quarterly: f64,
    pub price_yearly: f64,
    pub cover_image: String,
    pub images: String,      // JSON array as string
    pub is_active: bool,
    pub ratings_average: f64,
    pub ratings_quantity: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub monthly: f64,
    pub quarterly: f64,
    pub yearly: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Newspaper {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub description: String,
    pub publisher: String,
    pub languages: Vec<String>,
    pub categories: Vec<String>,
    pub price: Price,
    pub cover_image: String,
    pub images: Vec<String>,
    pub ratings_average: f64,
    pub ratings_quantity: i64,
    pub created_at: String,
    pub updated_at: String,
}

fn parse_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

impl From<NewspaperRow> for Newspaper {
    fn from(row: NewspaperRow) -> Self {
        Self {
            languages: parse_list(&row.languages),
            categories: parse_list(&row.categories),
            images: parse_list(&row.images),
            price: Price {
                monthly: row.price_monthly,
                quarterly: row.price_quarterly,
                yearly: row.price_yearly,
            },
            id: row.id,
            name: row.name,
            description: row.description,
            publisher: row.publisher,
            cover_image: row.cover_image,
            ratings_average: row.ratings_average,
            ratings_quantity: row.ratings_quantity,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriceInput {
    pub monthly: Option<f64>,
    pub quarterly: Option<f64>,
    pub yearly: Option<f64>,
}

/// Request body for create and (partial) update.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewspaperInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub publisher: Option<String>,
    pub languages: Option<Vec<String>>,
    pub categories: Option<Vec<String>>,
    pub price: Option<PriceInput>,
    pub cover_image: Option<String>,
    pub images: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub ratings_average: Option<f64>,
    pub ratings_quantity: Option<i64>,
}

/// A fully validated newspaper ready to be written.
#[derive(Debug, Clone)]
pub struct NewNewspaper {
    pub name: String,
    pub description: String,
    pub publisher: String,
    pub languages: Vec<String>,
    pub categories: Vec<String>,
    pub price: Price,
    pub cover_image: String,
    pub images: Vec<String>,
    pub is_active: bool,
    pub ratings_average: f64,
    pub ratings_quantity: i64,
}

fn required_text(value: Option<String>, message: &str) -> AppResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(message.to_string()))
}

fn required_price(value: Option<f64>, message: &str) -> AppResult<f64> {
    match value {
        Some(p) if p.is_finite() && p >= 0.0 => Ok(p),
        Some(_) => Err(AppError::Validation("Prices must be non-negative numbers".to_string())),
        None => Err(AppError::Validation(message.to_string())),
    }
}

/// 4.6666 -> 4.7
pub fn round_rating(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl NewspaperInput {
    pub fn into_new(self) -> AppResult<NewNewspaper> {
        let name = required_text(self.name, "A newspaper must have a name")?;
        let description = required_text(self.description, "Please provide a description")?;
        let publisher = required_text(self.publisher, "Please provide publisher name")?;
        let cover_image = required_text(self.cover_image, "A newspaper must have a cover image")?;

        let languages: Vec<String> = self
            .languages
            .unwrap_or_default()
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        if languages.is_empty() {
            return Err(AppError::Validation("Please provide at least one language".to_string()));
        }

        let categories = self.categories.unwrap_or_default();
        if categories.is_empty() {
            return Err(AppError::Validation("Please provide at least one category".to_string()));
        }
        if let Some(bad) = categories.iter().find(|c| !CATEGORIES.contains(&c.as_str())) {
            return Err(AppError::Validation(format!(
                "Invalid category: {}. Must be one of: {}",
                bad,
                CATEGORIES.join(", ")
            )));
        }

        let price = self.price.unwrap_or_default();
        let price = Price {
            monthly: required_price(price.monthly, "Please provide monthly subscription price")?,
            quarterly: required_price(price.quarterly, "Please provide quarterly subscription price")?,
            yearly: required_price(price.yearly, "Please provide yearly subscription price")?,
        };

        let ratings_average = round_rating(self.ratings_average.unwrap_or(4.5));
        if !(1.0..=5.0).contains(&ratings_average) {
            return Err(AppError::Validation(
                "Rating must be between 1.0 and 5.0".to_string(),
            ));
        }
        let ratings_quantity = self.ratings_quantity.unwrap_or(0);
        if ratings_quantity < 0 {
            return Err(AppError::Validation("Ratings quantity cannot be negative".to_string()));
        }

        Ok(NewNewspaper {
            name,
            description,
            publisher,
            languages,
            categories,
            price,
            cover_image,
            images: self.images.unwrap_or_default(),
            is_active: self.is_active.unwrap_or(true),
            ratings_average,
            ratings_quantity,
        })
    }

    /// Overlay `patch` on this input; fields absent from the patch are kept.
    pub fn merge(self, patch: NewspaperInput) -> NewspaperInput {
        let price = match (self.price, patch.price) {
            (Some(old), Some(new)) => Some(PriceInput {
                monthly: new.monthly.or(old.monthly),
                quarterly: new.quarterly.or(old.quarterly),
                yearly: new.yearly.or(old.yearly),
            }),
            (old, new) => new.or(old),
        };
        NewspaperInput {
            name: patch.name.or(self.name),
            description: patch.description.or(self.description),
            publisher: patch.publisher.or(self.publisher),
            languages: patch.languages.or(self.languages),
            categories: patch.categories.or(self.categories),
            price,
            cover_image: patch.cover_image.or(self.cover_image),
            images: patch.images.or(self.images),
            is_active: patch.is_active.or(self.is_active),
            ratings_average: patch.ratings_average.or(self.ratings_average),
            ratings_quantity: patch.ratings_quantity.or(self.ratings_quantity),
        }
    }
}

impl From<NewspaperRow> for NewspaperInput {
    fn from(row: NewspaperRow) -> Self {
        NewspaperInput {
            is_active: Some(row.is_active),
            languages: Some(parse_list(&row.languages)),
            categories: Some(parse_list(&row.categories)),
            images: Some(parse_list(&row.images)),
            price: Some(PriceInput {
                monthly: Some(row.price_monthly),
                quarterly: Some(row.price_quarterly),
                yearly: Some(row.price_yearly),
            }),
            name: Some(row.name),
            description: Some(row.description),
            publisher: Some(row.publisher),
            cover_image: Some(row.cover_image),
            ratings_average: Some(row.ratings_average),
            ratings_quantity: Some(row.ratings_quantity),
        }
    }
}

/// Filters, ordering and paging for the catalogue listing.
#[derive(Debug, Default)]
pub struct NewspaperQuery {
    pub category: Option<String>,
    pub language: Option<String>,
    pub publisher: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_rating: Option<f64>,
    /// Validated `ORDER BY` body.
    pub order_by: String,
    pub limit: i64,
    pub offset: i64,
}

/// Translate `sort=price,-ratingsAverage` into an ORDER BY body over known columns.
pub fn parse_sort(sort: Option<&str>) -> AppResult<String> {
    let Some(sort) = sort.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok("created_at DESC".to_string());
    };

    let mut parts = Vec::new();
    for field in sort.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        let (desc, key) = match field.strip_prefix('-') {
            Some(k) => (true, k),
            None => (false, field),
        };
        let column = match key {
            "name" => "name",
            "price" | "price.monthly" => "price_monthly",
            "ratingsAverage" => "ratings_average",
            "ratingsQuantity" => "ratings_quantity",
            "createdAt" => "created_at",
            other => {
                return Err(AppError::Validation(format!("Cannot sort by '{}'", other)));
            }
        };
        parts.push(format!("{} {}", column, if desc { "DESC" } else { "ASC" }));
    }
    Ok(parts.join(", "))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CatalogueStats {
    pub num_newspapers: i64,
    pub avg_rating: Option<f64>,
    pub avg_monthly_price: Option<f64>,
    pub min_monthly_price: Option<f64>,
    pub max_monthly_price: Option<f64>,
}

pub struct NewspaperRepository;

impl NewspaperRepository {
    pub async fn get(pool: &SqlitePool, id: &str) -> AppResult<Option<NewspaperRow>> {
        let row = query_as::<_, NewspaperRow>("SELECT * FROM newspapers WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    pub async fn list(pool: &SqlitePool, q: &NewspaperQuery) -> AppResult<Vec<NewspaperRow>> {
        let mut conditions = vec!["is_active = 1".to_string()];
        if q.category.is_some() {
            conditions.push(
                "EXISTS (SELECT 1 FROM json_each(newspapers.categories) WHERE value = ?)".to_string(),
            );
        }
        if q.language.is_some() {
            conditions.push(
                "EXISTS (SELECT 1 FROM json_each(newspapers.languages) WHERE lower(value) = lower(?))"
                    .to_string(),
            );
        }
        if q.publisher.is_some() {
            conditions.push("publisher = ?".to_string());
        }
        if q.min_price.is_some() {
            conditions.push("price_monthly >= ?".to_string());
        }
        if q.max_price.is_some() {
            conditions.push("price_monthly <= ?".to_string());
        }
        if q.min_rating.is_some() {
            conditions.push("ratings_average >= ?".to_string());
        }

        let sql = format!(
            "SELECT * FROM newspapers WHERE {} ORDER BY {} LIMIT ? OFFSET ?",
            conditions.join(" AND "),
            q.order_by
        );

        let mut query = query_as::<_, NewspaperRow>(&sql);
        if let Some(ref v) = q.category  { query = query.bind(v); }
        if let Some(ref v) = q.language  { query = query.bind(v); }
        if let Some(ref v) = q.publisher { query = query.bind(v); }
        if let Some(v) = q.min_price     { query = query.bind(v); }
        if let Some(v) = q.max_price     { query = query.bind(v); }
        if let Some(v) = q.min_rating    { query = query.bind(v); }

        let rows = query.bind(q.limit).bind(q.offset).fetch_all(pool).await?;
        Ok(rows)
    }

    /// Case-insensitive match on name and description.
    pub async fn search(pool: &SqlitePool, term: &str) -> AppResult<Vec<NewspaperRow>> {
        let escaped = term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let pattern = format!("%{}%", escaped);
        let rows = query_as::<_, NewspaperRow>(
            "SELECT * FROM newspapers
             WHERE is_active = 1
               AND (name LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')
             ORDER BY ratings_average DESC, name ASC",
        )
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn create(pool: &SqlitePool, paper: NewNewspaper) -> AppResult<NewspaperRow> {
        let id = Uuid::new_v4().to_string();
        let now = db::now();

        query_as::<_, NewspaperRow>(
            "INSERT INTO newspapers
                (id, name, description, publisher, languages, categories,
                 price_monthly, price_quarterly, price_yearly, cover_image, images,
                 is_active, ratings_average, ratings_quantity, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&id)
        .bind(&paper.name)
        .bind(&paper.description)
        .bind(&paper.publisher)
        .bind(serde_json::to_string(&paper.languages)?)
        .bind(serde_json::to_string(&paper.categories)?)
        .bind(paper.price.monthly)
        .bind(paper.price.quarterly)
        .bind(paper.price.yearly)
        .bind(&paper.cover_image)
        .bind(serde_json::to_string(&paper.images)?)
        .bind(paper.is_active)
        .bind(paper.ratings_average)
        .bind(paper.ratings_quantity)
        .bind(&now)
        .bind(&now)
        .fetch_one(pool)
        .await
        .map_err(|e| on_unique_violation(e, DUPLICATE_NAME))
    }

    pub async fn update(pool: &SqlitePool, id: &str, paper: NewNewspaper) -> AppResult<NewspaperRow> {
        let row = query_as::<_, NewspaperRow>(
            "UPDATE newspapers
             SET name = ?, description = ?, publisher = ?, languages = ?, categories = ?,
                 price_monthly = ?, price_quarterly = ?, price_yearly = ?, cover_image = ?,
                 images = ?, is_active = ?, ratings_average = ?, ratings_quantity = ?,
                 updated_at = ?
             WHERE id = ?
             RETURNING *",
        )
        .bind(&paper.name)
        .bind(&paper.description)
        .bind(&paper.publisher)
        .bind(serde_json::to_string(&paper.languages)?)
        .bind(serde_json::to_string(&paper.categories)?)
        .bind(paper.price.monthly)
        .bind(paper.price.quarterly)
        .bind(paper.price.yearly)
        .bind(&paper.cover_image)
        .bind(serde_json::to_string(&paper.images)?)
        .bind(paper.is_active)
        .bind(paper.ratings_average)
        .bind(paper.ratings_quantity)
        .bind(db::now())
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| on_unique_violation(e, DUPLICATE_NAME))?;

        row.ok_or_else(|| AppError::NotFound("No newspaper found with that ID".to_string()))
    }

    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM newspapers WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(d) if d.is_foreign_key_violation() => AppError::Conflict(
                    "Newspaper has subscriptions; set isActive to false instead".to_string(),
                ),
                _ => AppError::Database(e),
            })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("No newspaper found with that ID".to_string()));
        }
        Ok(())
    }

    pub async fn stats(pool: &SqlitePool) -> AppResult<CatalogueStats> {
        let stats = query_as::<_, CatalogueStats>(
            "SELECT COUNT(*)            AS num_newspapers,
                    AVG(ratings_average) AS avg_rating,
                    AVG(price_monthly)   AS avg_monthly_price,
                    MIN(price_monthly)   AS min_monthly_price,
                    MAX(price_monthly)   AS max_monthly_price
             FROM newspapers
             WHERE is_active = 1",
        )
        .fetch_one(pool)
        .await?;
        Ok(stats)
    }
}
