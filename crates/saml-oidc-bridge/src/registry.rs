use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

/// A Service Provider registered with the bridge. The entity ID is the
/// primary key; the ACS URL and binding always travel together.
#[derive(Debug, Clone, FromRow)]
pub struct ServiceProvider {
    pub entity_id: String,
    pub acs_url: String,
    pub acs_binding: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SpRegistry {
    pool: PgPool,
}

impl SpRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces the ACS URL and binding for `entity_id`.
    /// `created_at` is set on first insertion and never updated.
    pub async fn upsert(
        &self,
        entity_id: &str,
        acs_url: &str,
        acs_binding: &str,
    ) -> Result<(), sqlx::Error> {
        if entity_id.is_empty() || acs_url.is_empty() || acs_binding.is_empty() {
            return Err(sqlx::Error::Protocol(
                "service provider fields must not be empty".into(),
            ));
        }

        sqlx::query(
            "
            INSERT INTO service_providers (entity_id, acs_url, acs_binding)
            VALUES ($1, $2, $3)
            ON CONFLICT (entity_id) DO UPDATE SET
                acs_url = EXCLUDED.acs_url,
                acs_binding = EXCLUDED.acs_binding
            ",
        )
        .bind(entity_id)
        .bind(acs_url)
        .bind(acs_binding)
        .execute(&self.pool)
        .await?;

        tracing::info!(entity_id, acs_url, "service provider saved");
        Ok(())
    }

    /// Returns the registered Service Provider, or `None` when the entity ID
    /// is unknown. The SSO handler refuses to issue assertions for unknown
    /// entity IDs.
    pub async fn get(&self, entity_id: &str) -> Result<Option<ServiceProvider>, sqlx::Error> {
        sqlx::query_as::<_, ServiceProvider>(
            "
            SELECT entity_id, acs_url, acs_binding, created_at
            FROM service_providers
            WHERE entity_id = $1
            ",
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
    }
}
