use anyhow::{Context, Result};

/// Runtime configuration, loaded from `SAML_BRIDGE_*` environment variables.
/// Every variable has a default suitable for a local deployment next to a
/// Hydra instance and a PostgreSQL server.
#[derive(Clone)]
pub struct Config {
    pub base_url: String,
    pub host: String,
    pub port: u16,

    pub hydra_public_url: String,
    pub client_id: String,
    pub client_secret: String,

    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,

    pub cert_path: String,
    pub key_path: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env_or("SAML_BRIDGE_PORT", "8082")
            .parse::<u16>()
            .context("SAML_BRIDGE_PORT must be a valid u16")?;
        let db_port = env_or("SAML_BRIDGE_DB_PORT", "5432")
            .parse::<u16>()
            .context("SAML_BRIDGE_DB_PORT must be a valid u16")?;

        Ok(Self {
            base_url: env_or("SAML_BRIDGE_BASE_URL", "http://localhost:8082"),
            host: env_or("SAML_BRIDGE_HOST", "0.0.0.0"),
            port,
            hydra_public_url: env_or("SAML_BRIDGE_HYDRA_PUBLIC_URL", "http://localhost:4444"),
            client_id: env_or("SAML_BRIDGE_OIDC_CLIENT_ID", "service-bridge-client"),
            client_secret: env_or("SAML_BRIDGE_OIDC_CLIENT_SECRET", "secret"),
            db_host: env_or("SAML_BRIDGE_DB_HOST", "localhost"),
            db_port,
            db_name: env_or("SAML_BRIDGE_DB_NAME", "saml_bridge"),
            db_user: env_or("SAML_BRIDGE_DB_USER", "saml_bridge"),
            db_password: env_or("SAML_BRIDGE_DB_PASSWORD", "saml_bridge"),
            cert_path: env_or("SAML_BRIDGE_CERT_PATH", ".local/certs/bridge.crt"),
            key_path: env_or("SAML_BRIDGE_KEY_PATH", ".local/certs/bridge.key"),
        })
    }

    /// The bridge's IdP entity ID. Service providers reference the bridge by
    /// its metadata URL.
    pub fn entity_id(&self) -> String {
        format!("{}/saml/metadata", self.base_url)
    }

    pub fn sso_url(&self) -> String {
        format!("{}/saml/sso", self.base_url)
    }

    /// Redirect URI registered with the OIDC provider.
    pub fn redirect_uri(&self) -> String {
        format!("{}/callback", self.base_url)
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
        )
    }
}
