use crate::idp::response::{xml_escape, NAME_ID_FORMAT_EMAIL};
use crate::state::AppState;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use samael::metadata::{HTTP_POST_BINDING, HTTP_REDIRECT_BINDING};
use std::sync::Arc;

/// Serves the entity descriptor an SP needs to trust this bridge: the
/// entity ID, the signing certificate, and the SSO endpoint under both
/// supported bindings. AuthnRequests are accepted unsigned, and assertions
/// are never encrypted, so a single signing KeyDescriptor is all the
/// document carries.
pub async fn metadata(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let xml = build_metadata(
        &state.config.entity_id(),
        &state.config.sso_url(),
        &state.signer.credentials().certificate_base64(),
    );

    (
        [(header::CONTENT_TYPE, "application/samlmetadata+xml")],
        xml,
    )
}

fn build_metadata(entity_id: &str, sso_url: &str, certificate_b64: &str) -> String {
    let entity_id = xml_escape(entity_id);
    let sso_url = xml_escape(sso_url);

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}">
    <md:IDPSSODescriptor WantAuthnRequestsSigned="false" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
        <md:KeyDescriptor use="signing">
            <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
                <ds:X509Data>
                    <ds:X509Certificate>{certificate_b64}</ds:X509Certificate>
                </ds:X509Data>
            </ds:KeyInfo>
        </md:KeyDescriptor>
        <md:NameIDFormat>{NAME_ID_FORMAT_EMAIL}</md:NameIDFormat>
        <md:SingleSignOnService Binding="{HTTP_REDIRECT_BINDING}" Location="{sso_url}"/>
        <md:SingleSignOnService Binding="{HTTP_POST_BINDING}" Location="{sso_url}"/>
    </md:IDPSSODescriptor>
</md:EntityDescriptor>"#
    )
}
