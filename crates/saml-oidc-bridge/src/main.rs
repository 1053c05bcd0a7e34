use saml_oidc_bridge::config::Config;
use saml_oidc_bridge::state::AppState;
use saml_oidc_bridge::{app, db, pending, session};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env()?;
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!(db_host = %config.db_host, db_port = config.db_port, "connecting to PostgreSQL");
    let pool = db::connect(&config).await?;
    db::init_schema(&pool).await?;

    let state = Arc::new(AppState::new(config, pool).await?);

    tokio::spawn(session::session_sweep_task(state.sessions.clone()));
    tokio::spawn(pending::pending_sweep_task(state.pending.clone()));

    tracing::info!(url = %state.config.base_url, "SAML-OIDC bridge listening on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        _ = terminate => {},
    }
}
