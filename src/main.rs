use anyhow::{Context, Result};
use axum::Router;
use std::io::ErrorKind;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting file-exchange: uploads={}, staging={}, destination={}, collision={:?}",
        cfg.upload_dir.display(),
        cfg.staging_dir.display(),
        cfg.destination_dir.display(),
        cfg.collision
    );
    if cfg.api_key.is_none() {
        tracing::warn!("No API key configured; automated uploads will be rejected");
    }
    if cfg.admin_password.is_some() {
        tracing::info!("Operator override password is enabled");
    }

    // --- Open both stores (creates the directories) ---
    let state = state::AppState::from_config(&cfg)
        .await
        .context("opening upload and staging stores")?;

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes()).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    let local = listener.local_addr()?;
    tracing::info!("Web interface listening on http://{}", local);
    tracing::info!("Automated uploads go to http://{}/api/sap_upload", local);
    axum::serve(listener, app).await?;

    Ok(())
}
