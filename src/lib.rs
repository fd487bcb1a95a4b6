/// Library crate entry point.
/// Exposes internal modules for integration tests.
/// Production binary uses src/main.rs.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod sms;
