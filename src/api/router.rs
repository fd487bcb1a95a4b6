use axum::{routing::{get, patch, post}, Router};
use std::sync::Arc;
use super::AppState;
use super::handlers;

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        // Health + Prometheus metrics (public)
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::prometheus_metrics))
        // Users: authentication (public)
        .route("/api/v1/users/signup", post(handlers::users::signup))
        .route("/api/v1/users/login", post(handlers::users::login))
        .route("/api/v1/users/logout", get(handlers::users::logout))
        .route("/api/v1/users/forgotPassword", post(handlers::users::forgot_password))
        .route("/api/v1/users/resetPassword/{token}", patch(handlers::users::reset_password))
        // Users: current user (protected)
        .route("/api/v1/users/me", get(handlers::users::me))
        .route("/api/v1/users/updateMyPassword", patch(handlers::users::update_my_password))
        .route("/api/v1/users/updateMe", patch(handlers::users::update_me))
        .route("/api/v1/users/deleteMe", axum::routing::delete(handlers::users::delete_me))
        .route("/api/v1/users/my-subscriptions", get(handlers::users::my_subscriptions))
        .route("/api/v1/users/my-distribution-list", get(handlers::users::my_distribution_list))
        // Users: administration (admin only)
        .route("/api/v1/users", get(handlers::users::list).post(handlers::users::create))
        .route(
            "/api/v1/users/{id}",
            get(handlers::users::get).patch(handlers::users::update).delete(handlers::users::delete),
        )
        // Newspapers (reads public, writes admin only)
        .route("/api/v1/newspapers/search", get(handlers::newspapers::search))
        .route("/api/v1/newspapers/stats", get(handlers::newspapers::stats))
        .route("/api/v1/newspapers", get(handlers::newspapers::list).post(handlers::newspapers::create))
        .route(
            "/api/v1/newspapers/{id}",
            get(handlers::newspapers::get)
                .patch(handlers::newspapers::update)
                .delete(handlers::newspapers::delete),
        )
        // Subscriptions (protected)
        .route(
            "/api/v1/subscriptions/stats/subscription-stats",
            get(handlers::subscriptions::stats),
        )
        .route(
            "/api/v1/subscriptions",
            get(handlers::subscriptions::list).post(handlers::subscriptions::create),
        )
        .route(
            "/api/v1/subscriptions/{id}",
            get(handlers::subscriptions::get)
                .patch(handlers::subscriptions::update)
                .delete(handlers::subscriptions::cancel),
        )
        // Payments (protected; refunds and listing admin only)
        .route("/api/v1/payments/create-order", post(handlers::payments::create_order))
        .route("/api/v1/payments/verify", post(handlers::payments::verify))
        .route("/api/v1/payments/refund", post(handlers::payments::refund))
        .route("/api/v1/payments", get(handlers::payments::list))
        .route("/api/v1/payments/{id}", get(handlers::payments::get))
        // Audit log (admin only)
        .route("/api/v1/audit-log", get(handlers::audit_log::list))
        .fallback(handlers::not_found)
        .with_state(state)
}
