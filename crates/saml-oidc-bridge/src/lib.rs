pub mod admin;
pub mod callback;
pub mod config;
pub mod db;
pub mod error;
pub mod idp;
pub mod oidc;
pub mod pending;
pub mod registry;
pub mod session;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use state::AppState;
use std::sync::Arc;
use tower_cookies::CookieManagerLayer;
use tower_http::trace::TraceLayer;

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/saml", idp::router())
        .route("/callback", get(callback::oidc_callback))
        .route(
            "/admin/service-providers",
            post(admin::register_service_provider),
        )
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
}
