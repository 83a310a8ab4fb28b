use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload pushed to every live `/notifications` subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: i64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
