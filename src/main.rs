use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use newsdesk::{api, config, db, gateway, metrics, sms};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("newsdesk=info".parse()?)
        )
        .init();

    info!("Starting newsdesk v{}", env!("CARGO_PKG_VERSION"));

    let cfg = config::load()?;
    info!("Configuration loaded");

    let db_pool = db::init(&cfg).await?;
    info!("Database initialized");

    // Seed initial admin user if none exist
    db::seed_admin(&db_pool).await?;
    if cfg.database.seed_sample {
        db::seed_newspapers(&db_pool).await?;
    }

    let gateway = gateway::from_config(&cfg.payments)?;
    let sms = sms::from_config(&cfg.sms)?;
    let metrics = Arc::new(metrics::PlatformMetrics::default());

    api::serve(cfg, db_pool, gateway, sms, metrics).await
}
