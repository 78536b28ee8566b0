use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;
use url::Url;

pub fn validate_database_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw).context("invalid PostgreSQL URL")?;
    if !matches!(url.scheme(), "postgres" | "postgresql") {
        return Err(anyhow!(
            "Invalid database URL: must start with postgres:// or postgresql://"
        ));
    }
    if url.path().trim_start_matches('/').is_empty() {
        return Err(anyhow!("database URL must include database name"));
    }
    Ok(())
}

/// Opens the primary pool. The change feed takes one extra connection from
/// it for `LISTEN`.
pub async fn connect_pool(url: &str, max_connections: u32) -> Result<PgPool> {
    validate_database_url(url)?;

    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(2))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(url)
        .await
        .context("failed to connect to PostgreSQL")?;

    info!(max_connections, "database pool initialized");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    relay_core::MIGRATOR
        .run(pool)
        .await
        .context("database migration failed")?;
    info!("database migrations applied");
    Ok(())
}
