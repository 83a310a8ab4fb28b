//! Signed cookie sessions.
//!
//! The whole session lives in one HS256-signed cookie, so the server keeps no
//! session table. A cookie that fails verification or has expired is treated
//! as an empty session.

use std::path::Path;

use anyhow::{Context, bail};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use portal_identity::GateState;
use portal_types::api::Flash;
use portal_types::models::{Account, TokenBundle};

use crate::config::Config;
use crate::error::ApiError;

pub const SESSION_COOKIE: &str = "portal_session";

const SESSION_TTL_DAYS: i64 = 7;
const SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth2_token: Option<TokenBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth2_state: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flashes: Vec<Flash>,
}

#[derive(Serialize, Deserialize)]
struct SessionClaims {
    #[serde(flatten)]
    data: SessionData,
    exp: usize,
}

impl SessionData {
    pub fn current_user(&self) -> Option<Account> {
        match (self.uid, &self.username) {
            (Some(id), Some(username)) => Some(Account {
                id,
                username: username.clone(),
            }),
            _ => None,
        }
    }

    pub fn gate_state(&self) -> GateState {
        if self.current_user().is_some() {
            GateState::Authorized
        } else if self.oauth2_token.is_some() {
            GateState::PendingMembershipCheck
        } else if self.oauth2_state.is_some() {
            GateState::PendingCallback
        } else {
            GateState::Anonymous
        }
    }

    /// Bind the session to an account that passed the gate.
    pub fn authorize(&mut self, account: Account) {
        self.uid = Some(account.id);
        self.username = Some(account.username);
        self.oauth2_state = None;
    }

    /// Drop identity and OAuth state, keeping pending flashes.
    pub fn reset(&mut self) {
        let flashes = std::mem::take(&mut self.flashes);
        *self = Self {
            flashes,
            ..Self::default()
        };
    }

    pub fn flash(&mut self, flash: Flash) {
        self.flashes.push(flash);
    }

    pub fn take_flashes(&mut self) -> Vec<Flash> {
        std::mem::take(&mut self.flashes)
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Signing keys plus the cookie attributes every session cookie gets.
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    secure: bool,
}

impl SessionKeys {
    pub fn new(secret: &[u8], secure: bool) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            secure,
        }
    }

    pub fn encode(&self, data: &SessionData) -> Result<String, ApiError> {
        let claims = SessionClaims {
            data: data.clone(),
            exp: (chrono::Utc::now() + chrono::Duration::days(SESSION_TTL_DAYS)).timestamp() as usize,
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| ApiError::Internal(format!("session encode: {}", e)))
    }

    pub fn decode(&self, token: &str) -> Option<SessionData> {
        match decode::<SessionClaims>(token, &self.decoding, &Validation::default()) {
            Ok(data) => Some(data.claims.data),
            Err(e) => {
                debug!("Discarding invalid session cookie: {}", e);
                None
            }
        }
    }

    pub fn load(&self, jar: &CookieJar) -> SessionData {
        jar.get(SESSION_COOKIE)
            .and_then(|c| self.decode(c.value()))
            .unwrap_or_default()
    }

    /// Write `data` back to the jar, or remove the cookie if nothing is left in it.
    pub fn store(&self, jar: CookieJar, data: &SessionData) -> Result<CookieJar, ApiError> {
        if data.is_empty() {
            return Ok(clear(jar));
        }

        let cookie = Cookie::build((SESSION_COOKIE, self.encode(data)?))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax);

        Ok(jar.add(cookie))
    }
}

pub fn clear(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
}

/// Resolve the signing secret: configured value, else the secret file,
/// else a freshly generated secret written to the secret file.
pub fn load_or_create_secret(config: &Config) -> anyhow::Result<Vec<u8>> {
    if let Some(secret) = &config.session_secret {
        return Ok(secret.as_bytes().to_vec());
    }

    read_or_create_secret_file(&config.secret_file)
}

fn read_or_create_secret_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => {
            if bytes.len() < SECRET_LEN {
                bail!("secret file {} is shorter than {} bytes", path.display(), SECRET_LEN);
            }
            info!("Loaded session secret from {}", path.display());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let secret: [u8; SECRET_LEN] = rand::random();
            std::fs::write(path, secret)
                .with_context(|| format!("writing secret file {}", path.display()))?;
            info!("Generated new session secret at {}", path.display());
            Ok(secret.to_vec())
        }
        Err(e) => Err(e).with_context(|| format!("reading secret file {}", path.display())),
    }
}
