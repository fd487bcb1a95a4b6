use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::extract::{JsonBody, QueryParams};
use crate::api::middleware::rbac::AdminUser;
use crate::api::AppState;
use crate::db::audit::{log_action, Actor};
use crate::db::models::newspaper::{
    parse_sort, Newspaper, NewspaperInput, NewspaperQuery, NewspaperRepository,
};
use crate::error::{AppError, AppResult};

const DEFAULT_PAGE_SIZE: i64 = 100;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Deserialize)]
pub struct ListParams {
    pub category: Option<String>,
    pub language: Option<String>,
    pub publisher: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_rating: Option<f64>,
    pub sort: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub search: Option<String>,
}

impl ListParams {
    fn into_query(self) -> AppResult<NewspaperQuery> {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        Ok(NewspaperQuery {
            order_by: parse_sort(self.sort.as_deref())?,
            category: non_empty(self.category),
            language: non_empty(self.language),
            publisher: non_empty(self.publisher),
            min_price: self.min_price,
            max_price: self.max_price,
            min_rating: self.min_rating,
            limit,
            offset: (page - 1).saturating_mul(limit),
        })
    }
}

fn not_found() -> AppError {
    AppError::NotFound("No newspaper found with that ID".to_string())
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    QueryParams(params): QueryParams<ListParams>,
) -> AppResult<Json<Value>> {
    let query = params.into_query()?;
    let rows = NewspaperRepository::list(&state.db, &query).await?;
    let newspapers: Vec<Newspaper> = rows.into_iter().map(Newspaper::from).collect();

    Ok(Json(json!({
        "status": "success",
        "results": newspapers.len(),
        "data": { "newspapers": newspapers },
    })))
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    QueryParams(params): QueryParams<SearchParams>,
) -> AppResult<Json<Value>> {
    let term = params
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Validation("Please provide a search term".to_string()))?;

    let rows = NewspaperRepository::search(&state.db, term).await?;
    let results: Vec<Value> = rows
        .into_iter()
        .map(Newspaper::from)
        .map(|n| {
            json!({
                "_id": n.id,
                "name": n.name,
                "publisher": n.publisher,
                "price": n.price,
                "coverImage": n.cover_image,
                "ratingsAverage": n.ratings_average,
            })
        })
        .collect();

    Ok(Json(json!({
        "status": "success",
        "results": results.len(),
        "data": { "newspapers": results },
    })))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let stats = NewspaperRepository::stats(&state.db).await?;
    let stats = if stats.num_newspapers > 0 { vec![stats] } else { Vec::new() };
    Ok(Json(json!({ "status": "success", "data": { "stats": stats } })))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let row = NewspaperRepository::get(&state.db, &id).await?.ok_or_else(not_found)?;
    Ok(Json(json!({ "status": "success", "data": { "newspaper": Newspaper::from(row) } })))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    JsonBody(input): JsonBody<NewspaperInput>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let paper = input.into_new()?;
    let row = NewspaperRepository::create(&state.db, paper).await?;

    log_action(
        state.db.clone(),
        Actor::from(&admin),
        "create",
        "newspaper",
        Some(row.id.clone()),
        Some(row.name.clone()),
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "data": { "newspaper": Newspaper::from(row) } })),
    ))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    JsonBody(patch): JsonBody<NewspaperInput>,
) -> AppResult<Json<Value>> {
    let existing = NewspaperRepository::get(&state.db, &id).await?.ok_or_else(not_found)?;
    let paper = NewspaperInput::from(existing).merge(patch).into_new()?;
    let row = NewspaperRepository::update(&state.db, &id, paper).await?;

    log_action(
        state.db.clone(),
        Actor::from(&admin),
        "update",
        "newspaper",
        Some(id),
        Some(row.name.clone()),
    );

    Ok(Json(json!({ "status": "success", "data": { "newspaper": Newspaper::from(row) } })))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    NewspaperRepository::delete(&state.db, &id).await?;
    log_action(state.db.clone(), Actor::from(&admin), "delete", "newspaper", Some(id), None);
    Ok(StatusCode::NO_CONTENT)
}
