use crate::config::Config;
use crate::error::Error;
use anyhow::{Context, Result};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const JWKS_CACHE_TTL: Duration = Duration::from_secs(300);
const SCOPES: &str = "openid email profile";

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
}

/// Claims extracted from a verified ID token. The bridge requires a
/// non-empty email; `name` and `groups` are optional extras.
#[derive(Debug, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

struct CachedJwks {
    fetched_at: Instant,
    jwks: JwkSet,
}

/// Discovery-configured OIDC relying party: mints authorization URLs,
/// exchanges codes for tokens, and verifies ID tokens against the
/// provider's JWKS.
pub struct OidcClient {
    issuers: Vec<String>,
    authorization_endpoint: String,
    token_endpoint: String,
    jwks_uri: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: reqwest::Client,
    jwks: RwLock<Option<CachedJwks>>,
}

impl OidcClient {
    /// Performs OIDC discovery against the configured public URL. In local
    /// deployments the document's advertised issuer may differ from the URL
    /// the bridge reaches the provider on, so tokens are accepted when their
    /// `iss` matches either value.
    pub async fn discover(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        let issuer = config.hydra_public_url.trim_end_matches('/').to_string();
        let discovery_url = format!("{issuer}/.well-known/openid-configuration");

        tracing::info!(url = %discovery_url, "querying OIDC provider configuration");
        let doc: DiscoveryDocument = http
            .get(&discovery_url)
            .send()
            .await
            .context("OIDC discovery request failed")?
            .error_for_status()
            .context("OIDC discovery returned an error status")?
            .json()
            .await
            .context("failed to parse OIDC discovery document")?;

        let mut issuers = vec![issuer];
        if !issuers.contains(&doc.issuer) {
            issuers.push(doc.issuer);
        }

        Ok(Self {
            issuers,
            authorization_endpoint: doc.authorization_endpoint,
            token_endpoint: doc.token_endpoint,
            jwks_uri: doc.jwks_uri,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri(),
            http,
            jwks: RwLock::new(None),
        })
    }

    /// Builds the authorization-code redirect URL carrying the opaque state.
    pub fn authorize_url(&self, state: &str) -> String {
        let mut url = self.authorization_endpoint.clone();
        let separator = if url.contains('?') { '&' } else { '?' };
        url.push(separator);

        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", SCOPES)
            .append_pair("state", state)
            .finish();
        url.push_str(&query);
        url
    }

    /// Exchanges an authorization code for tokens. Fails when the provider
    /// rejects the code or when the response lacks a string `id_token`.
    pub async fn exchange_code(&self, code: &str) -> Result<(String, String), Error> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.redirect_uri),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ];

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::TokenExchange(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::TokenExchange(format!(
                "token endpoint returned {status}"
            )));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))?;

        let id_token = tokens
            .id_token
            .ok_or_else(|| Error::TokenExchange("no id_token field in token response".into()))?;

        Ok((tokens.access_token, id_token))
    }

    /// Verifies an ID token's signature against the provider's JWKS and
    /// validates audience, expiry, and issuer.
    pub async fn verify_id_token(&self, raw: &str) -> Result<IdTokenClaims, Error> {
        let header =
            decode_header(raw).map_err(|e| Error::TokenVerification(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(Error::TokenVerification(format!(
                "unsupported signing algorithm {:?}",
                header.alg
            )));
        }

        let key = self.decoding_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_issuer(&self.issuers);

        let token = decode::<IdTokenClaims>(raw, &key, &validation)
            .map_err(|e| Error::TokenVerification(e.to_string()))?;

        Ok(token.claims)
    }

    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, Error> {
        let jwks = self.jwks().await?;

        let jwk = match kid {
            Some(kid) => jwks
                .find(kid)
                .ok_or_else(|| Error::TokenVerification(format!("no JWKS key for kid {kid}")))?,
            None => jwks
                .keys
                .first()
                .ok_or_else(|| Error::TokenVerification("JWKS contains no keys".into()))?,
        };

        DecodingKey::from_jwk(jwk).map_err(|e| Error::TokenVerification(e.to_string()))
    }

    /// Returns the cached JWKS, refreshing it after the TTL. A stale cache is
    /// reused when a refresh fails so transient provider outages do not break
    /// verification of otherwise valid tokens.
    async fn jwks(&self) -> Result<JwkSet, Error> {
        {
            let cached = self.jwks.read().await;
            if let Some(entry) = cached.as_ref() {
                if entry.fetched_at.elapsed() <= JWKS_CACHE_TTL {
                    return Ok(entry.jwks.clone());
                }
            }
        }

        let fetched = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r.error_for_status().map_err(|e| e.to_string()));

        match fetched {
            Ok(response) => {
                let jwks: JwkSet = response
                    .json()
                    .await
                    .map_err(|e| Error::TokenVerification(format!("invalid JWKS: {e}")))?;
                let mut cached = self.jwks.write().await;
                *cached = Some(CachedJwks {
                    fetched_at: Instant::now(),
                    jwks: jwks.clone(),
                });
                Ok(jwks)
            }
            Err(e) => {
                let cached = self.jwks.read().await;
                if let Some(entry) = cached.as_ref() {
                    tracing::warn!(jwks_uri = %self.jwks_uri, error = %e, "JWKS refresh failed, using cached keys");
                    return Ok(entry.jwks.clone());
                }
                Err(Error::TokenVerification(format!("JWKS fetch failed: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> OidcClient {
        OidcClient {
            issuers: vec!["http://localhost:4444".into()],
            authorization_endpoint: "http://localhost:4444/oauth2/auth".into(),
            token_endpoint: "http://localhost:4444/oauth2/token".into(),
            jwks_uri: "http://localhost:4444/.well-known/jwks.json".into(),
            client_id: "service-bridge-client".into(),
            client_secret: "secret".into(),
            redirect_uri: "http://localhost:8082/callback".into(),
            http: reqwest::Client::new(),
            jwks: RwLock::new(None),
        }
    }

    #[test]
    fn authorize_url_carries_code_flow_parameters() {
        let client = test_client();
        let url = client.authorize_url("_req123:relay");

        assert!(url.starts_with("http://localhost:4444/oauth2/auth?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=service-bridge-client"));
        assert!(url.contains("scope=openid+email+profile"));
        assert!(url.contains("state=_req123%3Arelay"));
        assert!(url.contains(&format!(
            "redirect_uri={}",
            urlencoding::encode("http://localhost:8082/callback")
        )));
    }

    #[test]
    fn authorize_url_appends_to_existing_query() {
        let mut client = test_client();
        client.authorization_endpoint = "http://localhost:4444/oauth2/auth?audience=x".into();

        let url = client.authorize_url("_req");
        assert!(url.contains("?audience=x&response_type=code"));
    }
}
