use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, error};

use portal_types::api::Flash;

use crate::auth::{AppState, flash_redirect};
use crate::config::GateDenial;
use crate::error::ApiError;

/// Admit only requests carrying an authorized session. The session's
/// [`Account`](portal_types::models::Account) is handed to the handler as an extension.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(account) = state.session_keys.load(&jar).current_user() {
        req.extensions_mut().insert(account);
        return next.run(req).await;
    }

    debug!("No session for {}", req.uri().path());
    match state.config.gate_denial {
        GateDenial::Forbid => ApiError::AuthDenied("no session".into()).into_response(),
        GateDenial::Redirect => {
            match flash_redirect(&state, jar, Flash::danger("Please log in first"), "/") {
                Ok(response) => response,
                Err(e) => {
                    error!("Failed to store session: {}", e);
                    e.into_response()
                }
            }
        }
    }
}
