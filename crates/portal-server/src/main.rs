use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};

use portal_api::session::load_or_create_secret;
use portal_api::{AppState, AppStateInner, Config};
use portal_db::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env();
    let debug = config.as_ref().is_ok_and(|c| c.debug);

    // Init logging
    let default_filter = if debug {
        "portal=debug,portal_api=debug,portal_identity=debug,tower_http=debug"
    } else {
        "portal=info,portal_api=info,portal_identity=info,portal_db=info,portal_notify=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let config = config.inspect_err(|e| error!("Invalid configuration: {}", e))?;
    if config.debug {
        warn!("PORTAL_DEBUG is on: session cookies are sent without the Secure flag");
    }
    if !config.wireguard_dir.is_dir() {
        warn!("Wireguard pool {} does not exist yet", config.wireguard_dir.display());
    }

    let secret = load_or_create_secret(&config)?;
    let db = Database::open(&config.db_path)?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let state: AppState = Arc::new(AppStateInner::new(config, db, &secret)?);

    info!("Portal listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    portal_api::serve(listener, state, shutdown_signal()).await?;

    info!("Portal stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
