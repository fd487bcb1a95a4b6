use anyhow::Result;
use axum::Router;
use axum::http::{HeaderValue, Method, header};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use std::sync::Arc;
use std::time::Instant;
use dashmap::DashMap;
use crate::config::Config;
use crate::db::DbPool;
use crate::gateway::PaymentGateway;
use crate::metrics::PlatformMetrics;
use crate::sms::SmsSender;

pub mod router;
pub mod middleware;
pub mod handlers;
pub mod extract;
pub mod validators;

pub struct AppState {
    pub db: DbPool,
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
    /// Currency for new orders and captured payments.
    pub currency: String,
    /// Search radius for distributor assignment.
    pub max_distance_meters: f64,
    pub gateway: Arc<dyn PaymentGateway>,
    pub sms: Arc<dyn SmsSender>,
    pub metrics: Arc<PlatformMetrics>,
    /// Login failure tracking: email → (failure_count, window_start)
    pub login_attempts: DashMap<String, (u32, Instant)>,
}

impl AppState {
    pub fn new(
        cfg: &Config,
        db: DbPool,
        gateway: Arc<dyn PaymentGateway>,
        sms: Arc<dyn SmsSender>,
        metrics: Arc<PlatformMetrics>,
    ) -> Self {
        Self {
            db,
            jwt_secret: cfg.auth.jwt_secret.clone(),
            jwt_expiry_hours: cfg.auth.jwt_expiry_hours,
            currency: cfg.payments.currency.clone(),
            max_distance_meters: cfg.delivery.max_distance_meters,
            gateway,
            sms,
            metrics,
            login_attempts: DashMap::new(),
        }
    }
}

pub async fn serve(
    cfg: Config,
    db: DbPool,
    gateway: Arc<dyn PaymentGateway>,
    sms: Arc<dyn SmsSender>,
    metrics: Arc<PlatformMetrics>,
) -> Result<()> {
    let bind_addr = format!("{}:{}", cfg.api.bind, cfg.api.port);
    let state = Arc::new(AppState::new(&cfg, db, gateway, sms, metrics));
    let cors = build_cors_layer(&cfg.api.cors_allowed_origins);
    let app = build_app(state, cors);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("API listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::PATCH, Method::DELETE];
    let headers = [header::AUTHORIZATION, header::CONTENT_TYPE];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    if origins.is_empty() {
        tracing::info!("No CORS origins configured; allowing any origin");
        return CorsLayer::new().allow_origin(Any).allow_methods(methods).allow_headers(headers);
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
}

pub fn build_app(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .merge(router::routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
