use axum::{Extension, Form, extract::State, response::Response};
use axum_extra::extract::cookie::CookieJar;
use pulldown_cmark::{Event, Options, Parser, html};
use tracing::{info, warn};

use portal_types::api::{AddMessageForm, DeleteForm, Empty, Flash, HomeBody, MessageView};
use portal_types::models::Account;

use crate::auth::{AppState, flash_redirect, page, run_db};
use crate::error::ApiError;

/// Render a bulletin body to HTML. Raw HTML in the source is shown as text.
pub fn render_markdown(body: &str) -> String {
    let parser = Parser::new_ext(body, Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES).map(
        |event| match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
            other => other,
        },
    );

    let mut out = String::with_capacity(body.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

pub async fn home(
    State(state): State<AppState>,
    jar: CookieJar,
    Extension(user): Extension<Account>,
) -> Result<Response, ApiError> {
    let messages = run_db(&state, |db| db.get_messages())
        .await?
        .into_iter()
        .map(|row| MessageView {
            html: render_markdown(&row.body),
            id: row.id,
            author: row.author,
            body: row.body,
            created_at: row.created_at,
        })
        .collect();

    page(&state, jar, user, HomeBody { messages })
}

/// Any logged-in member may remove any message.
pub async fn delete_message(
    State(state): State<AppState>,
    jar: CookieJar,
    Extension(user): Extension<Account>,
    Form(form): Form<DeleteForm>,
) -> Result<Response, ApiError> {
    let id = form.id;
    match run_db(&state, move |db| db.delete_message(id)).await {
        Ok(true) => {
            info!("{} ({}) deleted message {}", user.username, user.id, id);
            flash_redirect(&state, jar, Flash::success("Message deleted"), "/home")
        }
        Ok(false) => flash_redirect(&state, jar, Flash::danger("No such message"), "/home"),
        Err(e) => flash_redirect(&state, jar, e.flash(), "/home"),
    }
}

pub async fn add_message_page(
    State(state): State<AppState>,
    jar: CookieJar,
    Extension(user): Extension<Account>,
) -> Result<Response, ApiError> {
    page(&state, jar, user, Empty {})
}

pub async fn add_message(
    State(state): State<AppState>,
    jar: CookieJar,
    Extension(user): Extension<Account>,
    Form(form): Form<AddMessageForm>,
) -> Result<Response, ApiError> {
    let body = form.message.trim().to_string();
    if body.is_empty() {
        warn!("{} posted an empty message", user.username);
        let err = ApiError::Validation("Message cannot be empty".into());
        return flash_redirect(&state, jar, err.flash(), "/add_message");
    }

    let author = user.username.clone();
    match run_db(&state, move |db| db.insert_message(&body, &author)).await {
        Ok(id) => {
            info!("{} posted message {}", user.username, id);
            flash_redirect(&state, jar, Flash::success("Message posted"), "/home")
        }
        Err(e) => flash_redirect(&state, jar, e.flash(), "/add_message"),
    }
}
