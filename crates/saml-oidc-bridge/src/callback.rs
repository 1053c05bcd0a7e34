use crate::error::Error;
use crate::session::{Session, SESSION_COOKIE, SESSION_LIFETIME_SECS};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use serde::Deserialize;
use std::sync::Arc;
use tower_cookies::cookie::time::Duration as CookieDuration;
use tower_cookies::cookie::SameSite;
use tower_cookies::{Cookie, Cookies};

#[derive(Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// OIDC return leg: exchanges the authorization code, verifies the ID
/// token, persists a session, and sends the browser back to `/saml/sso`
/// with the parked AuthnRequest replayed.
pub async fn oidc_callback(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Query(params): Query<CallbackParams>,
) -> Result<Response, Error> {
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or(Error::MissingAuthorizationCode)?;

    let (_access_token, raw_id_token) = state.oidc.exchange_code(&code).await?;
    let claims = state.oidc.verify_id_token(&raw_id_token).await?;

    if claims.email.is_empty() {
        return Err(Error::MissingEmail);
    }

    tracing::debug!(email = %claims.email, sub = %claims.sub, "user authenticated, creating SAML session");

    let session = Session::new(&claims.email, claims.name.as_deref(), claims.groups);
    state.sessions.save(&session).await?;

    // The cookie is only emitted once the row is durable, so the next
    // request carrying it is guaranteed to find the session.
    cookies.add(
        Cookie::build((SESSION_COOKIE, session.id.clone()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(CookieDuration::seconds(SESSION_LIFETIME_SECS))
            .build(),
    );

    // State is `<request_id>` or `<request_id>:<relay_state>`; request IDs
    // never contain a colon, so a single split recovers both parts.
    let state_param = params.state.unwrap_or_default();
    let (request_id, relay_state) = match state_param.split_once(':') {
        Some((id, rs)) => (id.to_string(), Some(rs.to_string()).filter(|s| !s.is_empty())),
        None => (state_param, None),
    };

    if !request_id.is_empty() {
        tracing::info!(request_id = %request_id, session_id = %session.id, "OIDC callback for SAML request");
    }

    let mut redirect_url = state.config.sso_url();

    if !request_id.is_empty() {
        if let Some(pending) = state.pending.take(&request_id) {
            let mut query = url::form_urlencoded::Serializer::new(String::new());
            query.append_pair("SAMLRequest", &pending.saml_request);
            if let Some(rs) = pending.relay_state.as_deref().filter(|s| !s.is_empty()) {
                query.append_pair("RelayState", rs);
            }
            redirect_url.push('?');
            redirect_url.push_str(&query.finish());
        } else if let Some(rs) = &relay_state {
            redirect_url.push_str(&format!("?RelayState={}", urlencoding::encode(rs)));
        }
    } else if let Some(rs) = &relay_state {
        redirect_url.push_str(&format!("?RelayState={}", urlencoding::encode(rs)));
    }

    tracing::info!(session_id = %session.id, "session created, redirecting back to SAML SSO handler");
    Ok(Redirect::to(&redirect_url).into_response())
}
