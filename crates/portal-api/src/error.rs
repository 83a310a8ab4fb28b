use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use portal_types::api::Flash;

/// Flash text for any failure the user cannot act on.
pub const SOMETHING_WENT_WRONG: &str = "Something went wrong";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AuthDenied(String),

    #[error("{0}")]
    Validation(String),

    #[error("No resources left")]
    ResourceExhausted,

    #[error("Unauthorized")]
    Unauthorized,

    /// The notification was stored and broadcast, but the webhook call failed.
    #[error("Webhook delivery failed: {reason}")]
    WebhookFailed { id: i64, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// The warning a browser user sees for this error.
    pub fn flash(&self) -> Flash {
        match self {
            ApiError::AuthDenied(_) => Flash::danger("You are not allowed to log in"),
            ApiError::Validation(msg) => Flash::danger(msg.clone()),
            ApiError::ResourceExhausted => Flash::danger("No more wireguard configs left"),
            _ => Flash::danger(SOMETHING_WENT_WRONG),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!("Internal error: {:#}", e);
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::AuthDenied(_) => (StatusCode::FORBIDDEN, serde_json::json!({ "error": self.to_string() })),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, serde_json::json!({ "error": self.to_string() })),
            ApiError::ResourceExhausted => (StatusCode::CONFLICT, serde_json::json!({ "error": self.to_string() })),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, serde_json::json!({ "error": "unauthorized" })),
            ApiError::WebhookFailed { id, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": "webhook delivery failed", "id": id }),
            ),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": SOMETHING_WENT_WRONG }),
            ),
        };

        (status, Json(body)).into_response()
    }
}
