use crate::config::Config;
use crate::idp::response::{ResponseBuilder, SigningCredentials};
use crate::oidc::OidcClient;
use crate::pending::PendingRequests;
use crate::registry::SpRegistry;
use crate::session::SessionStore;
use anyhow::Result;
use sqlx::PgPool;

pub struct AppState {
    pub config: Config,
    pub registry: SpRegistry,
    pub sessions: SessionStore,
    pub pending: PendingRequests,
    pub oidc: OidcClient,
    pub signer: ResponseBuilder,
}

impl AppState {
    /// Assembles the shared application state: signing credentials from the
    /// configured PEM files, OIDC discovery against the provider, and the
    /// Postgres-backed stores on the given pool.
    pub async fn new(config: Config, pool: PgPool) -> Result<Self> {
        let credentials = SigningCredentials::from_pem_files(&config.cert_path, &config.key_path)?;
        let signer = ResponseBuilder::new(config.entity_id(), credentials);
        let oidc = OidcClient::discover(&config).await?;

        Ok(Self {
            registry: SpRegistry::new(pool.clone()),
            sessions: SessionStore::new(pool),
            pending: PendingRequests::new(),
            oidc,
            signer,
            config,
        })
    }
}
