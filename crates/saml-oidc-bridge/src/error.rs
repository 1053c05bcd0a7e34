use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid SAML request: {0}")]
    InvalidSamlRequest(String),
    #[error("unknown service provider: {0}")]
    UnknownServiceProvider(String),
    #[error("{0}")]
    Validation(String),
    #[error("no code in callback")]
    MissingAuthorizationCode,
    #[error("no email in ID token, cannot authenticate user")]
    MissingEmail,
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("ID token verification failed: {0}")]
    TokenVerification(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::InvalidSamlRequest(_)
            | Error::Validation(_)
            | Error::MissingAuthorizationCode => StatusCode::BAD_REQUEST,
            Error::UnknownServiceProvider(_) | Error::MissingEmail => StatusCode::FORBIDDEN,
            Error::TokenExchange(_)
            | Error::TokenVerification(_)
            | Error::Database(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(error = %self, status = %status, "request failed");
        (status, self.to_string()).into_response()
    }
}
