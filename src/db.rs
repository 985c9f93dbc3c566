use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::PostgresConfig;
use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;

/// Open the connection pool, retrying while Postgres is unreachable.
pub async fn connect(config: &PostgresConfig, retry: &RetryPolicy) -> Result<PgPool> {
    let options = PgConnectOptions::from_str(&config.url)?;

    let pool = retry
        .run("postgres connect", SyncError::is_transient, || {
            let options = options.clone();
            async move {
                PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(Duration::from_secs(10))
                    .connect_with(options)
                    .await
                    .map_err(SyncError::from)
            }
        })
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        schema = %config.schema,
        "connected to postgres"
    );
    Ok(pool)
}

/// A single-connection pool that connects on first use. For one-shot checks
/// that should report an outage instead of waiting it out.
pub fn connect_lazy(config: &PostgresConfig) -> Result<PgPool> {
    let options = PgConnectOptions::from_str(&config.url)?;
    Ok(PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy_with(options))
}

/// Quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
