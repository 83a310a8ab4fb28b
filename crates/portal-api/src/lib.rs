pub mod auth;
pub mod config;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod notify;
pub mod session;
pub mod ssh;
pub mod wireguard;

use std::future::Future;

use axum::{
    Router,
    middleware as axum_mw,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

pub use auth::{AppState, AppStateInner};
pub use config::Config;
pub use error::ApiError;

/// Every route the portal serves.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/", get(auth::index))
        .route("/login", get(auth::login))
        .route("/logout", get(auth::logout))
        .route("/discord/callback", get(auth::callback))
        .route("/notify", post(notify::notify))
        .route("/get_ssh", get(ssh::get_ssh).layer(CorsLayer::permissive()));

    let gated = Router::new()
        .route("/home", get(messages::home).post(messages::delete_message))
        .route("/add_message", get(messages::add_message_page).post(messages::add_message))
        .route("/add_ssh", get(ssh::add_ssh_page).post(ssh::add_ssh))
        .route("/manage_ssh", get(ssh::manage_ssh).post(ssh::delete_ssh))
        .route("/get_wireguard", get(wireguard::get_wireguard))
        .route("/notifications", get(notify::notifications))
        .route("/view_notifications", get(notify::view_notifications))
        .route_layer(axum_mw::from_fn_with_state(state.clone(), middleware::require_session));

    let static_dir = state.config.static_dir.clone();

    Router::new()
        .merge(public)
        .merge(gated)
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `signal` resolves. Open `/notifications` streams are ended at
/// that point so graceful shutdown is not held up by idle subscribers.
pub async fn serve<F>(listener: TcpListener, state: AppState, signal: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let broadcaster = state.broadcaster.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            signal.await;
            broadcaster.close();
        })
        .await
}
