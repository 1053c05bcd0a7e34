use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool};
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the browser cookie carrying the opaque session ID.
pub const SESSION_COOKIE: &str = "saml_session";

/// Sessions expire ten minutes after creation; the cookie Max-Age matches.
pub const SESSION_LIFETIME_SECS: i64 = 600;

const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// An authenticated browser session, created by the OIDC callback and read
/// by the SSO handler to gate assertion issuance. Rows are never mutated;
/// re-login creates a new row.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: String,
    pub create_time: DateTime<Utc>,
    pub expire_time: DateTime<Utc>,
    #[sqlx(rename = "index_val")]
    pub index: String,
    pub name_id: String,
    pub user_email: String,
    pub user_common_name: String,
    pub groups: Vec<String>,
}

impl Session {
    /// Builds a fresh session for an authenticated subject. The NameID is the
    /// email; the common name falls back to the email when the OIDC provider
    /// supplied no display name.
    pub fn new(email: &str, common_name: Option<&str>, groups: Vec<String>) -> Self {
        let id = new_session_id();
        let now = Utc::now();
        Self {
            index: id.clone(),
            id,
            create_time: now,
            expire_time: now + Duration::seconds(SESSION_LIFETIME_SECS),
            name_id: email.to_string(),
            user_email: email.to_string(),
            user_common_name: common_name
                .filter(|n| !n.is_empty())
                .unwrap_or(email)
                .to_string(),
            groups,
        }
    }
}

/// Opaque session identifier: an underscore followed by a high-resolution
/// timestamp. Everything but this generator treats it as an opaque token.
fn new_session_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("_{nanos}")
}

#[derive(Clone)]
pub struct SessionStore {
    pool: PgPool,
}

impl SessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert-or-replace by session ID. Errors propagate so the callback can
    /// answer 500 without emitting a cookie for a session that was never
    /// persisted.
    pub async fn save(&self, session: &Session) -> Result<(), sqlx::Error> {
        sqlx::query(
            "
            INSERT INTO sessions
                (id, create_time, expire_time, index_val, name_id, user_email, user_common_name, groups)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                create_time = EXCLUDED.create_time,
                expire_time = EXCLUDED.expire_time,
                index_val = EXCLUDED.index_val,
                name_id = EXCLUDED.name_id,
                user_email = EXCLUDED.user_email,
                user_common_name = EXCLUDED.user_common_name,
                groups = EXCLUDED.groups
            ",
        )
        .bind(&session.id)
        .bind(session.create_time)
        .bind(session.expire_time)
        .bind(&session.index)
        .bind(&session.name_id)
        .bind(&session.user_email)
        .bind(&session.user_common_name)
        .bind(&session.groups)
        .execute(&self.pool)
        .await?;

        tracing::info!(session_id = %session.id, email = %session.user_email, "session saved");
        Ok(())
    }

    /// Returns the session when it exists and has not expired. Expiry is
    /// evaluated against the database clock so client/server skew cannot
    /// resurrect a stale row. Database errors are logged and reported as
    /// `None`, which sends the caller back through the OIDC flow.
    pub async fn get(&self, id: &str) -> Option<Session> {
        let result = sqlx::query_as::<_, Session>(
            "
            SELECT id, create_time, expire_time, index_val, name_id,
                   user_email, user_common_name, groups
            FROM sessions
            WHERE id = $1 AND expire_time > NOW()
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(session_id = id, error = %e, "failed to load session");
                None
            }
        }
    }

    /// Deletes all expired sessions. Idempotent and safe to run concurrently
    /// with reads and writes.
    pub async fn sweep(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE expire_time < NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub async fn session_sweep_task(store: SessionStore) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        match store.sweep().await {
            Ok(removed) if removed > 0 => {
                tracing::info!(removed, "swept expired sessions");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "session sweep failed"),
        }
    }
}
