use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use portal_db::Database;
use portal_identity::{
    CallbackParams, DiscordClient, GateDecision, GateState, IdentityError, check_access,
};
use portal_notify::Broadcaster;
use portal_types::api::{EntryPage, Flash, Page};
use portal_types::models::{Account, TokenBundle};

use crate::config::Config;
use crate::error::{ApiError, SOMETHING_WENT_WRONG};
use crate::notify::Webhook;
use crate::session::{self, SessionData, SessionKeys};
use crate::wireguard::ConfigPool;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub config: Config,
    pub discord: DiscordClient,
    pub broadcaster: Broadcaster,
    pub pool: ConfigPool,
    pub session_keys: SessionKeys,
    pub webhook: Option<Webhook>,
}

impl AppStateInner {
    pub fn new(config: Config, db: Database, session_secret: &[u8]) -> anyhow::Result<Self> {
        let discord = DiscordClient::new(config.oauth.clone())?;
        let webhook = config.webhook_url.as_deref().map(Webhook::new).transpose()?;

        Ok(Self {
            db,
            discord,
            broadcaster: Broadcaster::new(),
            pool: ConfigPool::new(config.wireguard_dir.clone()),
            session_keys: SessionKeys::new(session_secret, !config.debug),
            webhook,
            config,
        })
    }
}

// -- Helpers shared by the handlers --

/// Run a blocking database call off the async runtime.
pub(crate) async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.to_string())
        })?
        .map_err(ApiError::from)
}

/// Save the session and redirect.
pub(crate) fn redirect(
    state: &AppState,
    jar: CookieJar,
    session: &SessionData,
    to: &str,
) -> Result<Response, ApiError> {
    let jar = state.session_keys.store(jar, session)?;
    Ok((jar, Redirect::to(to)).into_response())
}

/// Queue a flash for the next page and redirect there.
pub(crate) fn flash_redirect(
    state: &AppState,
    jar: CookieJar,
    flash: Flash,
    to: &str,
) -> Result<Response, ApiError> {
    let mut session = state.session_keys.load(&jar);
    session.flash(flash);
    redirect(state, jar, &session, to)
}

/// Page context for a logged-in user, draining pending flashes.
pub(crate) fn page<T: Serialize>(
    state: &AppState,
    jar: CookieJar,
    user: Account,
    body: T,
) -> Result<Response, ApiError> {
    let mut session = state.session_keys.load(&jar);
    let flashes = session.take_flashes();
    let jar = state.session_keys.store(jar, &session)?;
    Ok((jar, Json(Page { user, flashes, body })).into_response())
}

// -- Handlers --

pub async fn index(State(state): State<AppState>, jar: CookieJar) -> Result<Response, ApiError> {
    let mut session = state.session_keys.load(&jar);
    if session.current_user().is_some() {
        return Ok(Redirect::to("/home").into_response());
    }

    let flashes = session.take_flashes();
    let jar = state.session_keys.store(jar, &session)?;
    Ok((
        jar,
        Json(EntryPage {
            login_url: "/login".into(),
            flashes,
        }),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    /// Space-separated scopes overriding the defaults.
    pub scope: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<LoginQuery>,
) -> Result<Response, ApiError> {
    let mut session = state.session_keys.load(&jar);

    match session.gate_state() {
        GateState::Authorized => Ok(Redirect::to("/home").into_response()),
        GateState::Anonymous | GateState::PendingCallback => {
            let scopes = match query.scope.as_deref().map(str::trim) {
                Some(s) if !s.is_empty() => s.split_whitespace().map(str::to_string).collect(),
                _ => state.config.policy.default_scopes(),
            };

            let login = state.discord.begin_login(&scopes).map_err(|e| {
                error!("Failed to build authorization URL: {}", e);
                ApiError::Internal(e.to_string())
            })?;

            session.oauth2_state = Some(login.state);
            let jar = state.session_keys.store(jar, &session)?;
            Ok((jar, Redirect::to(&login.url)).into_response())
        }
        GateState::PendingMembershipCheck => membership_check(&state, jar, session).await,
    }
}

async fn membership_check(
    state: &AppState,
    jar: CookieJar,
    mut session: SessionData,
) -> Result<Response, ApiError> {
    let Some(token) = session.oauth2_token.clone() else {
        return redirect(state, jar, &session, "/login");
    };

    let mut refreshed: Option<TokenBundle> = None;
    let decision = {
        let mut provider = state
            .discord
            .session(token, |t: &TokenBundle| refreshed = Some(t.clone()));
        check_access(&mut provider, &state.config.policy).await
    };
    if let Some(token) = refreshed {
        session.oauth2_token = Some(token);
    }

    match decision {
        Ok(GateDecision::Authorized(account)) => {
            info!("{} ({}) logged in", account.username, account.id);
            session.authorize(account);
            redirect(state, jar, &session, "/home")
        }
        Ok(GateDecision::Denied(reason)) => {
            warn!("Login refused: {:?}", reason);
            session.reset();
            session.flash(ApiError::AuthDenied(format!("{:?}", reason)).flash());
            redirect(state, jar, &session, "/")
        }
        Err(IdentityError::TokenRejected) => {
            warn!("Provider rejected the stored token, clearing session");
            session.reset();
            session.flash(Flash::danger(SOMETHING_WENT_WRONG));
            redirect(state, jar, &session, "/")
        }
        Err(e) => {
            error!("Membership check failed: {}", e);
            session.flash(Flash::danger(SOMETHING_WENT_WRONG));
            redirect(state, jar, &session, "/")
        }
    }
}

pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<Response, ApiError> {
    let mut session = state.session_keys.load(&jar);
    let expected = session.oauth2_state.take();

    match state.discord.complete_login(&params, expected.as_deref()).await {
        Ok(token) => {
            session.oauth2_token = Some(token);
            redirect(&state, jar, &session, "/login")
        }
        Err(IdentityError::AuthorizationRefused(text)) => {
            info!("Provider refused authorization: {}", text);
            let jar = state.session_keys.store(jar, &session)?;
            Ok((jar, (StatusCode::BAD_REQUEST, text)).into_response())
        }
        Err(e) => {
            warn!("OAuth callback failed: {}", e);
            session.flash(Flash::danger(SOMETHING_WENT_WRONG));
            redirect(&state, jar, &session, "/")
        }
    }
}

pub async fn logout(jar: CookieJar) -> Response {
    (session::clear(jar), Redirect::to("/")).into_response()
}
