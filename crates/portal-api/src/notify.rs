//! Inbound announcements and their live fan-out.
//!
//! A trusted caller POSTs `/notify` with the shared secret in `X-ALLOW-SPAM`.
//! The announcement is stored, pushed to every open `/notifications` stream,
//! and finally forwarded to the optional webhook.

use std::time::Duration;

use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::HeaderMap,
    response::{
        Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use reqwest::Url;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};

use portal_types::api::{NotificationView, NotificationsBody, NotifyRequest, NotifyResponse};
use portal_types::events::NotificationEvent;
use portal_types::models::Account;

use crate::auth::{AppState, page, run_db};
use crate::error::ApiError;

pub const NOTIFY_HEADER: &str = "X-ALLOW-SPAM";

const HISTORY_LIMIT: u32 = 100;
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound webhook that receives each announcement as `{"content": ...}`.
#[derive(Clone)]
pub struct Webhook {
    http: reqwest::Client,
    url: Url,
}

impl Webhook {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let url = Url::parse(url)?;
        let http = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self { http, url })
    }

    pub async fn send(&self, message: &str) -> Result<(), reqwest::Error> {
        self.http
            .post(self.url.clone())
            .json(&json!({ "content": message }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Constant-time comparison of the shared secret.
fn token_matches(expected: &str, presented: &str) -> bool {
    let expected = expected.as_bytes();
    let presented = presented.as_bytes();
    expected.len() == presented.len() && expected.ct_eq(presented).unwrap_u8() == 1
}

/// An unset `NOTIFY_TOKEN` rejects every caller.
fn check_token(state: &AppState, token: Option<&str>) -> Result<(), ApiError> {
    match (state.config.notify_token.as_deref(), token) {
        (Some(expected), Some(presented)) if token_matches(expected, presented) => Ok(()),
        _ => {
            warn!("Rejected /notify call with missing or wrong {}", NOTIFY_HEADER);
            Err(ApiError::Unauthorized)
        }
    }
}

/// Validate, persist, broadcast, then forward one announcement.
pub async fn ingest(
    state: &AppState,
    token: Option<&str>,
    message: &str,
) -> Result<NotifyResponse, ApiError> {
    check_token(state, token)?;

    let message = message.trim();
    if message.is_empty() {
        return Err(ApiError::Validation("message must not be empty".into()));
    }

    let body = message.to_string();
    let row = run_db(state, move |db| db.insert_notification(&body, Utc::now())).await?;
    let created_at = parse_timestamp(&row.created_at);
    info!("Stored notification {}", row.id);

    let delivered = state.broadcaster.broadcast(NotificationEvent {
        id: row.id,
        message: row.body,
        created_at,
    });

    if let Some(webhook) = &state.webhook {
        if let Err(e) = webhook.send(message).await {
            error!("Webhook delivery for notification {} failed: {}", row.id, e);
            return Err(ApiError::WebhookFailed {
                id: row.id,
                reason: e.to_string(),
            });
        }
        debug!("Webhook accepted notification {}", row.id);
    }

    Ok(NotifyResponse { id: row.id, delivered })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Unparseable notification timestamp '{}': {}", raw, e);
            DateTime::<Utc>::UNIX_EPOCH
        })
}

pub async fn notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<NotifyRequest>, JsonRejection>,
) -> Result<Json<NotifyResponse>, ApiError> {
    let token = headers.get(NOTIFY_HEADER).and_then(|v| v.to_str().ok());

    // Authenticate before looking at the body.
    check_token(&state, token)?;
    let Json(req) = body.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    let message = req.message;

    ingest(&state, token, &message).await.map(Json)
}

/// Live event stream. Each event's data is the JSON-encoded [`NotificationEvent`].
pub async fn notifications(
    State(state): State<AppState>,
    Extension(user): Extension<Account>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscription = state.broadcaster.subscribe();
    info!("{} subscribed to notifications ({})", user.username, subscription.id());

    let stream = subscription.map(|event| Event::default().json_data(event));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn view_notifications(
    State(state): State<AppState>,
    jar: CookieJar,
    Extension(user): Extension<Account>,
) -> Result<Response, ApiError> {
    let notifications = run_db(&state, |db| db.get_notifications(HISTORY_LIMIT))
        .await?
        .into_iter()
        .map(|row| NotificationView {
            created_at: parse_timestamp(&row.created_at),
            id: row.id,
            message: row.body,
        })
        .collect();

    page(&state, jar, user, NotificationsBody { notifications })
}
