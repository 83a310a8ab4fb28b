use axum::{
    Extension, Form,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{info, warn};

use portal_types::api::{AddSshForm, DeleteForm, Empty, Flash, ManageSshBody, SshKeyView};
use portal_types::models::Account;

use crate::auth::{AppState, flash_redirect, page, run_db};
use crate::error::ApiError;

const KEY_TYPE_PREFIXES: &[&str] = &["ssh-", "ecdsa-sha2-", "sk-ssh-", "sk-ecdsa-sha2-"];
const MAX_KEY_LEN: usize = 16 * 1024;

/// Check that `key` is a single authorized_keys line starting with a known key type.
pub fn validate_ssh_key(key: &str) -> Result<&str, ApiError> {
    let invalid = || ApiError::Validation("This does not look like a valid SSH key".into());

    if key.contains('\r') || key.contains('\n') {
        return Err(invalid());
    }
    let key = key.trim();
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(invalid());
    }
    if !KEY_TYPE_PREFIXES.iter().any(|p| key.starts_with(p)) {
        return Err(invalid());
    }
    // Type and base64 body.
    if key.split_whitespace().count() < 2 {
        return Err(invalid());
    }

    Ok(key)
}

pub async fn add_ssh_page(
    State(state): State<AppState>,
    jar: CookieJar,
    Extension(user): Extension<Account>,
) -> Result<Response, ApiError> {
    page(&state, jar, user, Empty {})
}

pub async fn add_ssh(
    State(state): State<AppState>,
    jar: CookieJar,
    Extension(user): Extension<Account>,
    Form(form): Form<AddSshForm>,
) -> Result<Response, ApiError> {
    let key = match validate_ssh_key(&form.key) {
        Ok(key) => key.to_string(),
        Err(e) => {
            warn!("{} submitted an invalid SSH key", user.username);
            return flash_redirect(&state, jar, e.flash(), "/add_ssh");
        }
    };

    let uid = user.id;
    let name = user.username.clone();
    match run_db(&state, move |db| db.insert_ssh_key(uid, &name, &key)).await {
        Ok(id) => {
            info!("{} added SSH key {}", user.username, id);
            flash_redirect(&state, jar, Flash::success("SSH key added"), "/manage_ssh")
        }
        Err(e) => flash_redirect(&state, jar, e.flash(), "/add_ssh"),
    }
}

pub async fn manage_ssh(
    State(state): State<AppState>,
    jar: CookieJar,
    Extension(user): Extension<Account>,
) -> Result<Response, ApiError> {
    let uid = user.id;
    let keys = run_db(&state, move |db| db.get_ssh_keys_for_owner(uid))
        .await?
        .into_iter()
        .map(|row| SshKeyView {
            id: row.id,
            name: row.name,
            key: row.key,
        })
        .collect();

    page(&state, jar, user, ManageSshBody { keys })
}

/// Deletes only keys the caller owns; any other id is a silent no-op.
pub async fn delete_ssh(
    State(state): State<AppState>,
    jar: CookieJar,
    Extension(user): Extension<Account>,
    Form(form): Form<DeleteForm>,
) -> Result<Response, ApiError> {
    let uid = user.id;
    let id = form.id;
    match run_db(&state, move |db| db.delete_ssh_key(id, uid)).await {
        Ok(true) => {
            info!("{} deleted SSH key {}", user.username, id);
            flash_redirect(&state, jar, Flash::success("SSH key deleted"), "/manage_ssh")
        }
        Ok(false) => {
            warn!("{} tried to delete SSH key {} they do not own", user.username, id);
            flash_redirect(&state, jar, Flash::success("SSH key deleted"), "/manage_ssh")
        }
        Err(e) => flash_redirect(&state, jar, e.flash(), "/manage_ssh"),
    }
}

/// Every registered key as `<key> <owner>\n`, ready for an authorized_keys sync job.
pub async fn get_ssh(State(state): State<AppState>) -> Result<Response, ApiError> {
    let keys = run_db(&state, |db| db.get_all_ssh_keys()).await?;

    let mut out = String::new();
    for row in keys {
        out.push_str(&row.key);
        out.push(' ');
        out.push_str(&row.name);
        out.push('\n');
    }

    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], out).into_response())
}
