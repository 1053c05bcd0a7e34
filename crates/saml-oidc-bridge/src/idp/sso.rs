use crate::error::Error;
use crate::idp::response::xml_escape;
use crate::registry::ServiceProvider;
use crate::session::{Session, SESSION_COOKIE};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use samael::metadata::HTTP_REDIRECT_BINDING;
use samael::schema::AuthnRequest;
use serde::Deserialize;
use std::io::{Read, Write};
use std::sync::Arc;
use tower_cookies::Cookies;

#[derive(Deserialize)]
pub struct SsoParams {
    #[serde(rename = "SAMLRequest")]
    pub saml_request: String,
    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
}

/// SSO entry via HTTP-Redirect binding: the AuthnRequest arrives as a query
/// parameter. The browser also re-enters here after the OIDC detour, with
/// the replayed request in the query string.
pub async fn sso_redirect(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Query(params): Query<SsoParams>,
) -> Result<Response, Error> {
    handle_sso(&state, &cookies, params).await
}

/// SSO entry via HTTP-POST binding: the AuthnRequest arrives as a form
/// field. Semantics are identical to the query variant.
pub async fn sso_post(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    axum::Form(params): axum::Form<SsoParams>,
) -> Result<Response, Error> {
    handle_sso(&state, &cookies, params).await
}

async fn handle_sso(
    state: &AppState,
    cookies: &Cookies,
    params: SsoParams,
) -> Result<Response, Error> {
    let xml = decode_saml_request(&params.saml_request)?;

    let authn_request: AuthnRequest = xml
        .parse()
        .map_err(|e| Error::InvalidSamlRequest(format!("failed to parse AuthnRequest: {e}")))?;

    let sp_entity_id = authn_request
        .issuer_value()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::InvalidSamlRequest("AuthnRequest missing Issuer".into()))?;

    let sp = state
        .registry
        .get(&sp_entity_id)
        .await?
        .ok_or_else(|| Error::UnknownServiceProvider(sp_entity_id.clone()))?;

    let relay_state = params.relay_state.filter(|s| !s.is_empty());

    let session = match cookies.get(SESSION_COOKIE) {
        Some(cookie) if !cookie.value().is_empty() => state.sessions.get(cookie.value()).await,
        _ => None,
    };

    match session {
        Some(session) => {
            tracing::info!(
                entity_id = %sp_entity_id,
                request_id = %authn_request.id,
                session_id = %session.id,
                "issuing SAML response"
            );
            issue_response(state, &sp, &session, &authn_request.id, relay_state.as_deref())
        }
        None => {
            // Park the verbatim request so it can be replayed after the
            // OIDC round-trip, then send the browser to the provider.
            state.pending.put(
                authn_request.id.clone(),
                params.saml_request.clone(),
                relay_state.clone(),
            );

            let oidc_state = match &relay_state {
                Some(rs) => format!("{}:{}", authn_request.id, rs),
                None => authn_request.id.clone(),
            };

            tracing::info!(
                entity_id = %sp_entity_id,
                request_id = %authn_request.id,
                "no valid session, redirecting to OIDC provider"
            );
            Ok(Redirect::to(&state.oidc.authorize_url(&oidc_state)).into_response())
        }
    }
}

fn issue_response(
    state: &AppState,
    sp: &ServiceProvider,
    session: &Session,
    request_id: &str,
    relay_state: Option<&str>,
) -> Result<Response, Error> {
    let response_xml =
        state
            .signer
            .build_response(&sp.entity_id, &sp.acs_url, session, request_id)?;

    if sp.acs_binding == HTTP_REDIRECT_BINDING {
        let url = redirect_binding_url(state, &sp.acs_url, &response_xml, relay_state)?;
        Ok(Redirect::to(&url).into_response())
    } else {
        Ok(post_binding_form(&sp.acs_url, &response_xml, relay_state).into_response())
    }
}

/// Auto-submitting HTML form that POSTs the signed SAML Response to the
/// Service Provider's ACS URL. RelayState is only present when the original
/// request carried one.
fn post_binding_form(acs_url: &str, response_xml: &str, relay_state: Option<&str>) -> Html<String> {
    let encoded = STANDARD.encode(response_xml.as_bytes());

    let relay_state_input = relay_state
        .map(|rs| format!(r#"<input type="hidden" name="RelayState" value="{}" />"#, xml_escape(rs)))
        .unwrap_or_default();

    Html(format!(
        r#"<!DOCTYPE html>
<html><body onload="document.forms[0].submit()">
<form method="POST" action="{acs_url}">
<input type="hidden" name="SAMLResponse" value="{encoded}" />
{relay_state_input}
</form></body></html>"#,
        acs_url = xml_escape(acs_url),
    ))
}

/// HTTP-Redirect binding for the response: DEFLATE + base64 in the query
/// string with a detached signature over the signed parameters.
fn redirect_binding_url(
    state: &AppState,
    acs_url: &str,
    response_xml: &str,
    relay_state: Option<&str>,
) -> Result<String, Error> {
    let compressed = deflate_compress(response_xml.as_bytes())?;
    let encoded = STANDARD.encode(&compressed);
    let signature = state
        .signer
        .redirect_binding_signature(&encoded, relay_state)?;

    let separator = if acs_url.contains('?') { '&' } else { '?' };
    let mut url = format!(
        "{acs_url}{separator}SAMLResponse={}",
        urlencoding::encode(&encoded)
    );
    if let Some(rs) = relay_state {
        url.push_str(&format!("&RelayState={}", urlencoding::encode(rs)));
    }
    url.push_str(&format!(
        "&SigAlg={}",
        urlencoding::encode(crate::idp::response::RSA_SHA256_SIG_URI)
    ));
    url.push_str(&format!("&Signature={}", urlencoding::encode(&signature)));
    Ok(url)
}

/// Decodes a SAMLRequest payload. The HTTP-Redirect binding deflates the
/// XML before base64, the HTTP-POST binding does not; trying DEFLATE first
/// and falling back to the raw bytes gives both entry points (and replays
/// of either form) identical semantics.
fn decode_saml_request(encoded: &str) -> Result<String, Error> {
    let compressed = STANDARD
        .decode(encoded)
        .map_err(|e| Error::InvalidSamlRequest(format!("base64 decode failed: {e}")))?;

    let mut decoder = DeflateDecoder::new(&compressed[..]);
    let mut xml = String::new();
    if decoder.read_to_string(&mut xml).is_ok() && !xml.is_empty() {
        return Ok(xml);
    }

    String::from_utf8(compressed)
        .map_err(|e| Error::InvalidSamlRequest(format!("invalid UTF-8: {e}")))
}

fn deflate_compress(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::Internal(anyhow::anyhow!("deflate failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::Internal(anyhow::anyhow!("deflate failed: {e}")))
}
