pub mod metadata;
pub mod response;
pub mod sso;

use crate::state::AppState;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/metadata", get(metadata::metadata))
        .route("/sso", get(sso::sso_redirect).post(sso::sso_post))
}
