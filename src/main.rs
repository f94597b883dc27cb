mod api;
mod app_state;
mod auth;
mod config;
mod crypto;
mod error;
mod hub;
mod router;
mod store;
mod ws;

use std::fs;

use app_state::AppState;
use config::Config;
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("shutdown signal received via Ctrl+C"),
        _ = terminate => tracing::info!("shutdown signal received via SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vaultd=info")),
        )
        .compact()
        .init();

    let config = Config::from_env();
    fs::create_dir_all(&config.data_dir)?;
    let secret = auth::load_or_generate_secret(&config.secret_path())?;
    let host = config.host.clone();

    let state = match AppState::new(config, &secret).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("failed to initialize app state: {e}");
            return Err(e.into());
        }
    };
    tracing::info!("database initialized");

    let router = router::get_router(state);

    let listener = match TcpListener::bind(&host).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind to address {host}: {e}");
            return Err(e.into());
        }
    };

    tracing::info!("listening at {host}");

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("server error: {e}");
        return Err(e.into());
    }

    Ok(())
}
