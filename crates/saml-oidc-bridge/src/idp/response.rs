//! SAML Response and Assertion construction with an enveloped RSA-SHA256
//! signature over the assertion.
//!
//! The XML is emitted in canonical-friendly form (single line, fixed
//! attribute order, explicit closing tags, namespaces declared on the
//! elements that use them), so the digest is computed over the bytes
//! exactly as serialized.

use crate::error::Error;
use crate::session::Session;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use openssl::x509::X509;
use uuid::Uuid;

pub const NAME_ID_FORMAT_EMAIL: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";
pub const RSA_SHA256_SIG_URI: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";

const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
const EXC_C14N_URI: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const ENVELOPED_SIG_URI: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const SHA256_DIGEST_URI: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
const AUTHN_CONTEXT_PASSWORD_PROTECTED: &str =
    "urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport";
const ATTR_NAME_FORMAT_URI: &str = "urn:oasis:names:tc:SAML:2.0:attrname-format:uri";

// LDAP attribute OIDs carried in the assertion.
const MAIL_OID: &str = "urn:oid:0.9.2342.19200300.100.1.3";
const COMMON_NAME_OID: &str = "urn:oid:2.5.4.3";
const EDU_PERSON_AFFILIATION_OID: &str = "urn:oid:1.3.6.1.4.1.5923.1.1.1.1";

/// Assertions become valid slightly in the past to absorb clock drift
/// between the bridge and the Service Provider.
const NOT_BEFORE_SKEW_SECS: i64 = 30;

/// RSA signing key and the matching X.509 certificate, loaded once at
/// startup.
pub struct SigningCredentials {
    key: PKey<Private>,
    cert_der: Vec<u8>,
}

impl SigningCredentials {
    pub fn from_pem_files(cert_path: &str, key_path: &str) -> Result<Self> {
        let cert_pem = std::fs::read(cert_path).context("failed to read SAML certificate")?;
        let key_pem = std::fs::read(key_path).context("failed to read SAML private key")?;

        let cert = X509::from_pem(&cert_pem).context("failed to parse SAML certificate")?;
        let key = PKey::private_key_from_pem(&key_pem)
            .context("failed to parse SAML private key")?;
        let cert_der = cert
            .to_der()
            .context("failed to encode certificate as DER")?;

        Ok(Self { key, cert_der })
    }

    pub fn certificate_base64(&self) -> String {
        STANDARD.encode(&self.cert_der)
    }

    pub fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    pub fn sign_sha256(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.key)
            .context("failed to create signer")?;
        signer.update(data).context("failed to feed signer")?;
        signer.sign_to_vec().context("signing failed")
    }
}

/// Builds signed SAML Responses for the bridge's IdP side.
pub struct ResponseBuilder {
    idp_entity_id: String,
    credentials: SigningCredentials,
}

impl ResponseBuilder {
    pub fn new(idp_entity_id: String, credentials: SigningCredentials) -> Self {
        Self {
            idp_entity_id,
            credentials,
        }
    }

    pub fn credentials(&self) -> &SigningCredentials {
        &self.credentials
    }

    /// Builds a signed SAML Response bound to the session. `InResponseTo` is
    /// the inbound AuthnRequest ID, the assertion lifetime matches the
    /// session expiry, and `NotBefore` is backdated by the skew allowance.
    pub fn build_response(
        &self,
        sp_entity_id: &str,
        acs_url: &str,
        session: &Session,
        in_response_to: &str,
    ) -> Result<String, Error> {
        let response_id = format!("_resp_{}", Uuid::new_v4());
        let assertion_id = format!("_assert_{}", Uuid::new_v4());
        let now = Utc::now();
        let not_before = now - Duration::seconds(NOT_BEFORE_SKEW_SECS);

        let xml = self.build_response_xml(
            &response_id,
            &assertion_id,
            sp_entity_id,
            acs_url,
            session,
            in_response_to,
            now,
            not_before,
        );

        self.sign_response(&xml, &assertion_id)
    }

    /// Detached signature for the HTTP-Redirect binding: signs the query
    /// string `SAMLResponse=..[&RelayState=..]&SigAlg=..` and returns the
    /// base64 signature value.
    pub fn redirect_binding_signature(
        &self,
        encoded_response: &str,
        relay_state: Option<&str>,
    ) -> Result<String, Error> {
        let mut to_sign = format!("SAMLResponse={}", urlencoding::encode(encoded_response));
        if let Some(rs) = relay_state {
            to_sign.push_str(&format!("&RelayState={}", urlencoding::encode(rs)));
        }
        to_sign.push_str(&format!(
            "&SigAlg={}",
            urlencoding::encode(RSA_SHA256_SIG_URI)
        ));

        let signature = self.credentials.sign_sha256(to_sign.as_bytes())?;
        Ok(STANDARD.encode(signature))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_response_xml(
        &self,
        response_id: &str,
        assertion_id: &str,
        sp_entity_id: &str,
        acs_url: &str,
        session: &Session,
        in_response_to: &str,
        issue_instant: DateTime<Utc>,
        not_before: DateTime<Utc>,
    ) -> String {
        let issue_instant = saml_instant(issue_instant);
        let not_before = saml_instant(not_before);
        let not_on_or_after = saml_instant(session.expire_time);

        let issuer = xml_escape(&self.idp_entity_id);
        let audience = xml_escape(sp_entity_id);
        let acs = xml_escape(acs_url);
        let in_response_to = xml_escape(in_response_to);
        let name_id = xml_escape(&session.name_id);
        let session_index = xml_escape(&session.index);

        let mut xml = String::with_capacity(4096);
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push_str(&format!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="{response_id}" Version="2.0" IssueInstant="{issue_instant}" Destination="{acs}" InResponseTo="{in_response_to}">"#
        ));
        xml.push_str(&format!(
            r#"<saml:Issuer xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">{issuer}</saml:Issuer>"#
        ));
        xml.push_str(&format!(
            r#"<samlp:Status><samlp:StatusCode Value="{STATUS_SUCCESS}"></samlp:StatusCode></samlp:Status>"#
        ));

        // Assertion. Declares its own namespace so the signed element is
        // self-contained for digest purposes.
        xml.push_str(&format!(
            r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{assertion_id}" Version="2.0" IssueInstant="{issue_instant}">"#
        ));
        xml.push_str(&format!(r#"<saml:Issuer>{issuer}</saml:Issuer>"#));
        xml.push_str("<saml:Subject>");
        xml.push_str(&format!(
            r#"<saml:NameID Format="{NAME_ID_FORMAT_EMAIL}">{name_id}</saml:NameID>"#
        ));
        xml.push_str(&format!(
            r#"<saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer"><saml:SubjectConfirmationData NotOnOrAfter="{not_on_or_after}" Recipient="{acs}" InResponseTo="{in_response_to}"></saml:SubjectConfirmationData></saml:SubjectConfirmation>"#
        ));
        xml.push_str("</saml:Subject>");
        xml.push_str(&format!(
            r#"<saml:Conditions NotBefore="{not_before}" NotOnOrAfter="{not_on_or_after}"><saml:AudienceRestriction><saml:Audience>{audience}</saml:Audience></saml:AudienceRestriction></saml:Conditions>"#
        ));
        xml.push_str(&format!(
            r#"<saml:AuthnStatement AuthnInstant="{issue_instant}" SessionIndex="{session_index}" SessionNotOnOrAfter="{not_on_or_after}"><saml:AuthnContext><saml:AuthnContextClassRef>{AUTHN_CONTEXT_PASSWORD_PROTECTED}</saml:AuthnContextClassRef></saml:AuthnContext></saml:AuthnStatement>"#
        ));
        xml.push_str(&self.build_attribute_statement(session));
        xml.push_str("</saml:Assertion>");
        xml.push_str("</samlp:Response>");
        xml
    }

    fn build_attribute_statement(&self, session: &Session) -> String {
        let mut xml = String::from("<saml:AttributeStatement>");
        push_attribute(&mut xml, MAIL_OID, "mail", &[session.user_email.clone()]);
        push_attribute(
            &mut xml,
            COMMON_NAME_OID,
            "cn",
            &[session.user_common_name.clone()],
        );
        if !session.groups.is_empty() {
            push_attribute(
                &mut xml,
                EDU_PERSON_AFFILIATION_OID,
                "eduPersonAffiliation",
                &session.groups,
            );
        }
        xml.push_str("</saml:AttributeStatement>");
        xml
    }

    /// Computes the assertion digest, signs the SignedInfo, and inserts the
    /// `ds:Signature` element directly after the assertion's Issuer.
    fn sign_response(&self, xml: &str, assertion_id: &str) -> Result<String, Error> {
        let assertion = extract_element(xml, assertion_id, "saml:Assertion")?;

        let digest = openssl::hash::hash(MessageDigest::sha256(), assertion.as_bytes())
            .map_err(|e| Error::Internal(anyhow::anyhow!("digest failed: {e}")))?;
        let digest_b64 = STANDARD.encode(digest);

        let signed_info = format!(
            r##"<ds:SignedInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:CanonicalizationMethod Algorithm="{EXC_C14N_URI}"></ds:CanonicalizationMethod><ds:SignatureMethod Algorithm="{RSA_SHA256_SIG_URI}"></ds:SignatureMethod><ds:Reference URI="#{assertion_id}"><ds:Transforms><ds:Transform Algorithm="{ENVELOPED_SIG_URI}"></ds:Transform><ds:Transform Algorithm="{EXC_C14N_URI}"></ds:Transform></ds:Transforms><ds:DigestMethod Algorithm="{SHA256_DIGEST_URI}"></ds:DigestMethod><ds:DigestValue>{digest_b64}</ds:DigestValue></ds:Reference></ds:SignedInfo>"##
        );

        let signature = self.credentials.sign_sha256(signed_info.as_bytes())?;
        let signature_b64 = STANDARD.encode(signature);
        let certificate_b64 = self.credentials.certificate_base64();

        let signature_xml = format!(
            r#"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#">{signed_info}<ds:SignatureValue>{signature_b64}</ds:SignatureValue><ds:KeyInfo><ds:X509Data><ds:X509Certificate>{certificate_b64}</ds:X509Certificate></ds:X509Data></ds:KeyInfo></ds:Signature>"#
        );

        // The signature lands after the assertion's Issuer element.
        let assertion_start = find_assertion_start(xml, assertion_id)?;
        let issuer_end = xml[assertion_start..]
            .find("</saml:Issuer>")
            .map(|pos| assertion_start + pos + "</saml:Issuer>".len())
            .ok_or_else(|| {
                Error::Internal(anyhow::anyhow!("assertion is missing an Issuer element"))
            })?;

        let mut signed = String::with_capacity(xml.len() + signature_xml.len());
        signed.push_str(&xml[..issuer_end]);
        signed.push_str(&signature_xml);
        signed.push_str(&xml[issuer_end..]);
        Ok(signed)
    }
}

fn push_attribute(xml: &mut String, name: &str, friendly_name: &str, values: &[String]) {
    xml.push_str(&format!(
        r#"<saml:Attribute Name="{name}" FriendlyName="{friendly_name}" NameFormat="{ATTR_NAME_FORMAT_URI}">"#
    ));
    for value in values {
        xml.push_str(&format!(
            r#"<saml:AttributeValue xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="xs:string">{}</saml:AttributeValue>"#,
            xml_escape(value)
        ));
    }
    xml.push_str("</saml:Attribute>");
}

fn find_assertion_start(xml: &str, assertion_id: &str) -> Result<usize, Error> {
    let id_attr = format!(r#"ID="{assertion_id}""#);
    let id_pos = xml
        .find(&id_attr)
        .ok_or_else(|| Error::Internal(anyhow::anyhow!("assertion element not found")))?;
    Ok(xml[..id_pos].rfind('<').unwrap_or(0))
}

fn extract_element<'a>(xml: &'a str, id: &str, tag: &str) -> Result<&'a str, Error> {
    let start = find_assertion_start(xml, id)?;
    let close = format!("</{tag}>");
    let end = xml[start..]
        .find(&close)
        .map(|pos| start + pos + close.len())
        .ok_or_else(|| Error::Internal(anyhow::anyhow!("unclosed {tag} element")))?;
    Ok(&xml[start..end])
}

fn saml_instant(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn xml_escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::sign::Verifier;

    fn test_builder() -> ResponseBuilder {
        let credentials = SigningCredentials::from_pem_files(
            concat!(env!("CARGO_MANIFEST_DIR"), "/certs/bridge-cert.pem"),
            concat!(env!("CARGO_MANIFEST_DIR"), "/certs/bridge-key.pem"),
        )
        .expect("failed to load test credentials");
        ResponseBuilder::new("http://localhost:8082/saml/metadata".into(), credentials)
    }

    fn test_session() -> Session {
        Session::new("alice@example.com", Some("Alice"), vec!["staff".into()])
    }

    #[test]
    fn response_carries_request_binding_fields() {
        let builder = test_builder();
        let session = test_session();

        let xml = builder
            .build_response(
                "https://sp.example/meta",
                "https://sp.example/acs",
                &session,
                "_req42",
            )
            .unwrap();

        assert!(xml.contains(r#"InResponseTo="_req42""#));
        assert!(xml.contains(r#"Destination="https://sp.example/acs""#));
        assert!(xml.contains(r#"Recipient="https://sp.example/acs""#));
        assert!(xml.contains("<saml:Audience>https://sp.example/meta</saml:Audience>"));
        assert!(xml.contains(&format!(
            r#"<saml:NameID Format="{NAME_ID_FORMAT_EMAIL}">alice@example.com</saml:NameID>"#
        )));
        assert!(xml.contains(&format!(r#"SessionIndex="{}""#, session.index)));
        assert!(xml.contains(STATUS_SUCCESS));
    }

    #[test]
    fn response_lifetime_matches_session_expiry() {
        let builder = test_builder();
        let session = test_session();

        let xml = builder
            .build_response("https://sp.example/meta", "https://sp.example/acs", &session, "_r")
            .unwrap();

        let expected = saml_instant(session.expire_time);
        assert!(xml.contains(&format!(r#"NotOnOrAfter="{expected}""#)));
    }

    #[test]
    fn response_includes_email_and_cn_attributes() {
        let builder = test_builder();
        let session = test_session();

        let xml = builder
            .build_response("https://sp.example/meta", "https://sp.example/acs", &session, "_r")
            .unwrap();

        assert!(xml.contains(&format!(r#"Name="{MAIL_OID}" FriendlyName="mail""#)));
        assert!(xml.contains(">alice@example.com</saml:AttributeValue>"));
        assert!(xml.contains(&format!(r#"Name="{COMMON_NAME_OID}" FriendlyName="cn""#)));
        assert!(xml.contains(">Alice</saml:AttributeValue>"));
        assert!(xml.contains(">staff</saml:AttributeValue>"));
    }

    #[test]
    fn groups_attribute_is_omitted_when_empty() {
        let builder = test_builder();
        let session = Session::new("alice@example.com", None, vec![]);

        let xml = builder
            .build_response("https://sp.example/meta", "https://sp.example/acs", &session, "_r")
            .unwrap();

        assert!(!xml.contains(EDU_PERSON_AFFILIATION_OID));
    }

    #[test]
    fn signature_verifies_against_certificate() {
        let builder = test_builder();
        let session = test_session();

        let xml = builder
            .build_response("https://sp.example/meta", "https://sp.example/acs", &session, "_r")
            .unwrap();

        // Recover the SignedInfo exactly as signed and check the RSA
        // signature with the certificate's public key.
        let si_start = xml.find("<ds:SignedInfo").unwrap();
        let si_end = xml.find("</ds:SignedInfo>").unwrap() + "</ds:SignedInfo>".len();
        let signed_info = &xml[si_start..si_end];

        let sig_start = xml.find("<ds:SignatureValue>").unwrap() + "<ds:SignatureValue>".len();
        let sig_end = xml.find("</ds:SignatureValue>").unwrap();
        let signature = STANDARD.decode(&xml[sig_start..sig_end]).unwrap();

        let cert = X509::from_der(builder.credentials().cert_der()).unwrap();
        let public_key = cert.public_key().unwrap();
        let mut verifier = Verifier::new(MessageDigest::sha256(), &public_key).unwrap();
        verifier.update(signed_info.as_bytes()).unwrap();
        assert!(verifier.verify(&signature).unwrap());
    }

    #[test]
    fn digest_covers_the_unsigned_assertion() {
        let builder = test_builder();
        let session = test_session();

        let signed = builder
            .build_response("https://sp.example/meta", "https://sp.example/acs", &session, "_r")
            .unwrap();

        let digest_start = signed.find("<ds:DigestValue>").unwrap() + "<ds:DigestValue>".len();
        let digest_end = signed.find("</ds:DigestValue>").unwrap();
        let embedded = &signed[digest_start..digest_end];

        // Strip the signature element; the digest must match the assertion
        // as it was before the signature was inserted.
        let sig_start = signed.find("<ds:Signature ").unwrap();
        let sig_end = signed.find("</ds:Signature>").unwrap() + "</ds:Signature>".len();
        let unsigned = format!("{}{}", &signed[..sig_start], &signed[sig_end..]);

        let assertion_id_start = unsigned.find(r#"ID="_assert_"#).unwrap() + 4;
        let assertion_id_end = assertion_id_start + unsigned[assertion_id_start..].find('"').unwrap();
        let assertion_id = &unsigned[assertion_id_start..assertion_id_end];

        let assertion = extract_element(&unsigned, assertion_id, "saml:Assertion").unwrap();
        let digest = openssl::hash::hash(MessageDigest::sha256(), assertion.as_bytes()).unwrap();
        assert_eq!(embedded, STANDARD.encode(digest));
    }

    #[test]
    fn redirect_binding_signature_verifies() {
        let builder = test_builder();

        let signature_b64 = builder
            .redirect_binding_signature("ZmFrZS1yZXNwb25zZQ==", Some("xyz"))
            .unwrap();
        let signature = STANDARD.decode(signature_b64).unwrap();

        let to_sign = format!(
            "SAMLResponse={}&RelayState=xyz&SigAlg={}",
            urlencoding::encode("ZmFrZS1yZXNwb25zZQ=="),
            urlencoding::encode(RSA_SHA256_SIG_URI)
        );

        let cert = X509::from_der(builder.credentials().cert_der()).unwrap();
        let public_key = cert.public_key().unwrap();
        let mut verifier = Verifier::new(MessageDigest::sha256(), &public_key).unwrap();
        verifier.update(to_sign.as_bytes()).unwrap();
        assert!(verifier.verify(&signature).unwrap());
    }

    #[test]
    fn xml_escape_handles_markup_characters() {
        assert_eq!(xml_escape("a&b<c>"), "a&amp;b&lt;c&gt;");
        assert_eq!(xml_escape(r#"he said "hi""#), "he said &quot;hi&quot;");
        assert_eq!(xml_escape("plain"), "plain");
    }
}
