use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Account;

// -- Flashes --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Success,
    Danger,
}

/// One-shot user-visible message carried in the session until the next page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub level: FlashLevel,
    pub text: String,
}

impl Flash {
    pub fn success(text: impl Into<String>) -> Self {
        Self { level: FlashLevel::Success, text: text.into() }
    }

    pub fn danger(text: impl Into<String>) -> Self {
        Self { level: FlashLevel::Danger, text: text.into() }
    }
}

// -- Pages --

#[derive(Debug, Serialize, Deserialize)]
pub struct EntryPage {
    pub login_url: String,
    pub flashes: Vec<Flash>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub user: Account,
    pub flashes: Vec<Flash>,
    #[serde(flatten)]
    pub body: T,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Empty {}

// -- Messages --

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub author: String,
    pub body: String,
    /// `body` rendered from markdown, raw HTML escaped.
    pub html: String,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HomeBody {
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Deserialize)]
pub struct AddMessageForm {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteForm {
    pub id: i64,
}

// -- SSH keys --

#[derive(Debug, Serialize, Deserialize)]
pub struct SshKeyView {
    pub id: i64,
    pub name: String,
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManageSshBody {
    pub keys: Vec<SshKeyView>,
}

#[derive(Debug, Deserialize)]
pub struct AddSshForm {
    pub key: String,
}

// -- Notifications --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub id: i64,
    pub delivered: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationView {
    pub id: i64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationsBody {
    pub notifications: Vec<NotificationView>,
}
