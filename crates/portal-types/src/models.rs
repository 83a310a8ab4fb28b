use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tokens are treated as expired this long before the provider says so.
const EXPIRY_SKEW_SECS: i64 = 30;

/// The identity a session is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: u64,
    pub username: String,
}

/// OAuth2 token bundle as held in the session between the callback and the
/// membership check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds). `None` means the provider gave no lifetime.
    pub expires_at: Option<i64>,
    pub scope: Option<String>,
}

impl TokenBundle {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(at) => (now + Duration::seconds(EXPIRY_SKEW_SECS)).timestamp() >= at,
            None => false,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

/// A Wireguard config file bound to one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAssignment {
    pub filename: String,
    pub uid: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(expires_at: Option<i64>) -> TokenBundle {
        TokenBundle {
            access_token: "a".into(),
            token_type: "Bearer".into(),
            refresh_token: Some("r".into()),
            expires_at,
            scope: None,
        }
    }

    #[test]
    fn token_without_lifetime_never_expires() {
        assert!(!bundle(None).is_expired(Utc::now()));
    }

    #[test]
    fn token_expires_with_skew() {
        let now = Utc::now();
        assert!(bundle(Some(now.timestamp() + 10)).is_expired(now));
        assert!(!bundle(Some(now.timestamp() + 3600)).is_expired(now));
        assert!(bundle(Some(now.timestamp() - 1)).is_expired(now));
    }
}
