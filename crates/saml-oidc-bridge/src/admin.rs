use crate::error::Error;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use samael::metadata::{HTTP_POST_BINDING, HTTP_REDIRECT_BINDING};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub acs_url: String,
    #[serde(default)]
    pub acs_binding: String,
}

/// Registers (or re-registers) a Service Provider. Accepts JSON or
/// form-encoded bodies; an absent Content-Type is treated as form-encoded.
pub async fn register_service_provider(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, Error> {
    let request = parse_body(&headers, &body)?;
    let (entity_id, acs_url, acs_binding) = validate(request)?;

    state.registry.upsert(&entity_id, &acs_url, &acs_binding).await?;

    tracing::info!(entity_id = %entity_id, "service provider registered");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "status": "success",
            "message": "Service provider registered",
            "entity_id": entity_id,
        })),
    ))
}

fn parse_body(headers: &HeaderMap, body: &[u8]) -> Result<RegisterRequest, Error> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.contains("application/json") {
        serde_json::from_slice(body)
            .map_err(|_| Error::Validation("failed to parse JSON request".into()))
    } else if content_type.contains("application/x-www-form-urlencoded") || content_type.is_empty()
    {
        serde_urlencoded::from_bytes(body)
            .map_err(|_| Error::Validation("failed to parse form request".into()))
    } else {
        Err(Error::Validation("unsupported Content-Type".into()))
    }
}

/// Validation pipeline: required fields, URL shape for entity ID and ACS
/// URL, then the binding (empty defaults to HTTP-POST).
fn validate(request: RegisterRequest) -> Result<(String, String, String), Error> {
    if request.entity_id.is_empty() || request.acs_url.is_empty() {
        return Err(Error::Validation(
            "missing required fields: entity_id and acs_url are required".into(),
        ));
    }

    validate_http_url(&request.acs_url, "acs_url")?;
    validate_http_url(&request.entity_id, "entity_id")?;

    let acs_binding = if request.acs_binding.is_empty() {
        HTTP_POST_BINDING.to_string()
    } else if request.acs_binding == HTTP_POST_BINDING
        || request.acs_binding == HTTP_REDIRECT_BINDING
    {
        request.acs_binding
    } else {
        return Err(Error::Validation("invalid acs_binding value".into()));
    };

    Ok((request.entity_id, request.acs_url, acs_binding))
}

fn validate_http_url(value: &str, field: &str) -> Result<(), Error> {
    let parsed = url::Url::parse(value).map_err(|_| {
        Error::Validation(format!(
            "invalid {field}: must be a valid URL with scheme and host"
        ))
    })?;

    if !parsed.has_host() {
        return Err(Error::Validation(format!(
            "invalid {field}: must be a valid URL with scheme and host"
        )));
    }
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::Validation(format!(
            "invalid {field}: scheme must be http or https"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn request(entity_id: &str, acs_url: &str, acs_binding: &str) -> RegisterRequest {
        RegisterRequest {
            entity_id: entity_id.into(),
            acs_url: acs_url.into(),
            acs_binding: acs_binding.into(),
        }
    }

    #[test]
    fn accepts_both_permitted_bindings() {
        for binding in [HTTP_POST_BINDING, HTTP_REDIRECT_BINDING] {
            let (_, _, validated) =
                validate(request("https://sp.example/meta", "https://sp.example/acs", binding))
                    .unwrap();
            assert_eq!(validated, binding);
        }
    }

    #[test]
    fn empty_binding_defaults_to_http_post() {
        let (_, _, binding) =
            validate(request("https://sp.example/meta", "https://sp.example/acs", "")).unwrap();
        assert_eq!(binding, HTTP_POST_BINDING);
    }

    #[test]
    fn rejects_unknown_binding() {
        let result = validate(request(
            "https://sp.example/meta",
            "https://sp.example/acs",
            "invalid-binding",
        ));
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn rejects_missing_required_fields() {
        assert!(validate(request("", "https://sp.example/acs", "")).is_err());
        assert!(validate(request("https://sp.example/meta", "", "")).is_err());
    }

    #[test]
    fn rejects_malformed_entity_ids() {
        for entity_id in [
            "not-a-url",
            "example.com/metadata",
            "ftp://example.com/metadata",
            "http:///metadata",
        ] {
            let result = validate(request(entity_id, "https://sp.example/acs", ""));
            assert!(result.is_err(), "expected rejection for {entity_id}");
        }
    }

    #[test]
    fn rejects_malformed_acs_urls() {
        for acs_url in ["not-a-url", "example.com/acs", "ftp://example.com/acs"] {
            let result = validate(request("https://sp.example/meta", acs_url, ""));
            assert!(result.is_err(), "expected rejection for {acs_url}");
        }
    }

    #[test]
    fn parses_json_and_form_bodies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let parsed = parse_body(
            &headers,
            br#"{"entity_id":"https://sp.example/meta","acs_url":"https://sp.example/acs"}"#,
        )
        .unwrap();
        assert_eq!(parsed.entity_id, "https://sp.example/meta");
        assert_eq!(parsed.acs_binding, "");

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let parsed = parse_body(
            &headers,
            b"entity_id=https%3A%2F%2Fsp.example%2Fmeta&acs_url=https%3A%2F%2Fsp.example%2Facs",
        )
        .unwrap();
        assert_eq!(parsed.acs_url, "https://sp.example/acs");
    }

    #[test]
    fn absent_content_type_is_treated_as_form() {
        let headers = HeaderMap::new();
        let parsed = parse_body(&headers, b"entity_id=a&acs_url=b").unwrap();
        assert_eq!(parsed.entity_id, "a");
    }

    #[test]
    fn rejects_unsupported_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(parse_body(&headers, b"x").is_err());
    }
}
