use crate::config::Config;
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

const CREATE_SESSIONS: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        create_time TIMESTAMPTZ NOT NULL,
        expire_time TIMESTAMPTZ NOT NULL,
        index_val TEXT NOT NULL,
        name_id TEXT NOT NULL,
        user_email TEXT NOT NULL,
        user_common_name TEXT NOT NULL,
        groups TEXT[] DEFAULT '{}'
    )
";

const CREATE_SESSIONS_EXPIRE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_sessions_expire_time ON sessions(expire_time)";

const CREATE_SERVICE_PROVIDERS: &str = "
    CREATE TABLE IF NOT EXISTS service_providers (
        entity_id TEXT PRIMARY KEY,
        acs_url TEXT NOT NULL,
        acs_binding TEXT NOT NULL DEFAULT 'urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
";

pub async fn connect(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url())
        .await
        .context("failed to connect to PostgreSQL")?;
    Ok(pool)
}

/// Creates the sessions and service_providers tables if they don't exist.
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_SESSIONS).execute(pool).await?;
    sqlx::query(CREATE_SESSIONS_EXPIRE_INDEX).execute(pool).await?;
    sqlx::query(CREATE_SERVICE_PROVIDERS).execute(pool).await?;
    tracing::info!("database schema initialized");
    Ok(())
}
