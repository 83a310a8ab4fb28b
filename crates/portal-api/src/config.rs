//! Portal configuration loaded from environment variables.
//!
//! OAuth credentials and the guild id are required; everything else has a
//! default suitable for running behind a reverse proxy on one host.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use tracing::info;

use portal_identity::{GatePolicy, OAuthConfig};

/// Secrets shipped in example env files that must never be used for real.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me", "change-me-to-a-random-string", "secret"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("{0} is still a placeholder")]
    Placeholder(&'static str),
}

/// What the gate does with a request that has no session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDenial {
    /// Plain 403.
    Forbid,
    /// Flash a warning and send the browser to `/`.
    Redirect,
}

impl FromStr for GateDenial {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forbid" | "403" => Ok(Self::Forbid),
            "redirect" => Ok(Self::Redirect),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Env: `OAUTH2_CLIENT_ID`, `OAUTH2_CLIENT_SECRET`, `OAUTH2_REDIRECT_URI`, `API_BASE_URL`
    pub oauth: OAuthConfig,

    /// Env: `GUILD_ID`, `REQUIRED_ROLE_IDS` (comma-separated)
    pub policy: GatePolicy,

    /// Shared secret expected in `X-ALLOW-SPAM`. Unset disables `/notify`.
    /// Env: `NOTIFY_TOKEN`
    pub notify_token: Option<String>,

    /// Env: `NOTIFY_WEBHOOK_URL`
    pub webhook_url: Option<String>,

    /// Env: `PORTAL_DEBUG`
    pub debug: bool,

    /// Env: `PORTAL_HOST`, `PORTAL_PORT`
    pub host: String,
    pub port: u16,

    /// Env: `PORTAL_DB_PATH`
    pub db_path: PathBuf,

    /// Directory of pre-generated Wireguard configs.
    /// Env: `PORTAL_WIREGUARD_DIR`
    pub wireguard_dir: PathBuf,

    /// Env: `PORTAL_STATIC_DIR`
    pub static_dir: PathBuf,

    /// Env: `PORTAL_SESSION_SECRET`
    pub session_secret: Option<String>,

    /// Where a generated session secret is kept when none is configured.
    /// Env: `PORTAL_SECRET_FILE`
    pub secret_file: PathBuf,

    /// Env: `PORTAL_GATE_DENIAL` (`forbid` | `redirect`)
    pub gate_denial: GateDenial,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let oauth = OAuthConfig {
            client_id: required("OAUTH2_CLIENT_ID")?,
            client_secret: required("OAUTH2_CLIENT_SECRET")?,
            redirect_uri: get("OAUTH2_REDIRECT_URI")
                .unwrap_or_else(|| "http://localhost:1234/discord/callback".into()),
            api_base: get("API_BASE_URL").unwrap_or_else(|| "https://discord.com/api".into()),
        };

        let required_roles: Vec<String> = get("REQUIRED_ROLE_IDS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let policy = GatePolicy::new(required("GUILD_ID")?, required_roles);

        let notify_token = get("NOTIFY_TOKEN");
        if notify_token.as_deref().is_some_and(|t| PLACEHOLDER_SECRETS.contains(&t)) {
            return Err(ConfigError::Placeholder("NOTIFY_TOKEN"));
        }

        let session_secret = get("PORTAL_SESSION_SECRET");
        if session_secret.as_deref().is_some_and(|t| PLACEHOLDER_SECRETS.contains(&t)) {
            return Err(ConfigError::Placeholder("PORTAL_SESSION_SECRET"));
        }

        let port = match get("PORTAL_PORT") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid { key: "PORTAL_PORT", value: v })?,
            None => 1234,
        };

        let gate_denial = match get("PORTAL_GATE_DENIAL") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid { key: "PORTAL_GATE_DENIAL", value: v })?,
            None => GateDenial::Forbid,
        };

        let debug = get("PORTAL_DEBUG").is_some_and(|v| v != "false" && v != "0");

        let config = Self {
            oauth,
            policy,
            notify_token,
            webhook_url: get("NOTIFY_WEBHOOK_URL"),
            debug,
            host: get("PORTAL_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: get("PORTAL_DB_PATH").unwrap_or_else(|| "db.sqlite".into()).into(),
            wireguard_dir: get("PORTAL_WIREGUARD_DIR").unwrap_or_else(|| "./wireguard".into()).into(),
            static_dir: get("PORTAL_STATIC_DIR").unwrap_or_else(|| "./static".into()).into(),
            session_secret,
            secret_file: get("PORTAL_SECRET_FILE").unwrap_or_else(|| "./secret".into()).into(),
            gate_denial,
        };

        if config.notify_token.is_none() {
            info!("NOTIFY_TOKEN not set, /notify will reject every call");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("OAUTH2_CLIENT_ID", "cid"),
        ("OAUTH2_CLIENT_SECRET", "csecret"),
        ("GUILD_ID", "G1"),
    ];

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(BASE)).unwrap();
        assert_eq!(config.port, 1234);
        assert_eq!(config.oauth.api_base, "https://discord.com/api");
        assert!(config.policy.required_roles.is_empty());
        assert_eq!(config.gate_denial, GateDenial::Forbid);
        assert!(config.notify_token.is_none());
        assert!(!config.debug);
    }

    #[test]
    fn required_values_are_enforced() {
        let err = Config::from_lookup(lookup(&[("OAUTH2_CLIENT_ID", "cid")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("OAUTH2_CLIENT_SECRET")));
    }

    #[test]
    fn role_list_and_denial_mode_parse() {
        let mut pairs = BASE.to_vec();
        pairs.push(("REQUIRED_ROLE_IDS", " R1, ,R2 "));
        pairs.push(("PORTAL_GATE_DENIAL", "Redirect"));
        pairs.push(("PORTAL_DEBUG", "1"));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(config.policy.required_roles.len(), 2);
        assert!(config.policy.required_roles.contains("R2"));
        assert_eq!(config.gate_denial, GateDenial::Redirect);
        assert!(config.debug);
    }

    #[test]
    fn placeholder_and_garbage_are_rejected() {
        let mut pairs = BASE.to_vec();
        pairs.push(("NOTIFY_TOKEN", "change-me"));
        assert!(matches!(
            Config::from_lookup(lookup(&pairs)),
            Err(ConfigError::Placeholder("NOTIFY_TOKEN"))
        ));

        let mut pairs = BASE.to_vec();
        pairs.push(("PORTAL_PORT", "http"));
        assert!(matches!(
            Config::from_lookup(lookup(&pairs)),
            Err(ConfigError::Invalid { key: "PORTAL_PORT", .. })
        ));
    }
}
