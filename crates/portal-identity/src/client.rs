use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use reqwest::{StatusCode, Url, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use portal_types::models::{Account, TokenBundle};

use crate::error::IdentityError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// OAuth2 application settings for the Discord-style provider.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// e.g. `https://discord.com/api`
    pub api_base: String,
}

impl OAuthConfig {
    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }

    pub fn authorize_url(&self) -> String {
        self.endpoint("/oauth2/authorize")
    }

    pub fn token_url(&self) -> String {
        self.endpoint("/oauth2/token")
    }
}

/// Where to send the browser, and the state value to remember for the callback.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    pub url: String,
    pub state: String,
}

/// Query parameters the provider appends to the redirect URI.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Receives every token the client obtains by refreshing, so the caller can
/// write it back into its session.
pub trait TokenUpdater {
    fn update(&mut self, token: &TokenBundle);
}

impl<F> TokenUpdater for F
where
    F: FnMut(&TokenBundle),
{
    fn update(&mut self, token: &TokenBundle) {
        (*self)(token)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_bundle(self, previous_refresh: Option<&str>) -> TokenBundle {
        let now = chrono::Utc::now().timestamp();
        TokenBundle {
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token: self.refresh_token.or_else(|| previous_refresh.map(str::to_string)),
            expires_at: self.expires_in.map(|secs| now + secs),
            scope: self.scope,
        }
    }
}

#[derive(Deserialize)]
struct UserResponse {
    id: String,
    username: String,
}

#[derive(Deserialize)]
struct GuildResponse {
    id: String,
}

#[derive(Deserialize)]
struct MemberResponse {
    #[serde(default)]
    roles: Vec<String>,
}

/// OAuth2 authorization-code client plus the handful of provider API calls
/// the access gate needs.
#[derive(Clone)]
pub struct DiscordClient {
    http: reqwest::Client,
    config: Arc<OAuthConfig>,
}

impl DiscordClient {
    pub fn new(config: OAuthConfig) -> Result<Self, IdentityError> {
        Url::parse(&config.api_base)
            .map_err(|e| IdentityError::Config(format!("API base '{}': {}", config.api_base, e)))?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("portal/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    /// Build the provider authorization URL with a fresh random state.
    pub fn begin_login(&self, scopes: &[String]) -> Result<LoginRedirect, IdentityError> {
        let state = B64.encode(rand::random::<[u8; 24]>());
        let scope = scopes.join(" ");

        let url = Url::parse_with_params(
            &self.config.authorize_url(),
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| IdentityError::Config(e.to_string()))?;

        Ok(LoginRedirect {
            url: url.into(),
            state,
        })
    }

    /// Validate the callback and exchange its code for a token bundle.
    pub async fn complete_login(
        &self,
        params: &CallbackParams,
        expected_state: Option<&str>,
    ) -> Result<TokenBundle, IdentityError> {
        if let Some(error) = &params.error {
            let detail = params.error_description.as_deref().unwrap_or(error);
            return Err(IdentityError::AuthorizationRefused(detail.to_string()));
        }

        match (expected_state, params.state.as_deref()) {
            (Some(expected), Some(got)) if expected == got => {}
            _ => return Err(IdentityError::StateMismatch),
        }

        let code = params.code.as_deref().ok_or(IdentityError::MissingCode)?;

        let response = self
            .http
            .post(self.config.token_url())
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await?;

        let token: TokenResponse = read_json(response).await?;
        info!("Exchanged authorization code for access token");
        Ok(token.into_bundle(None))
    }

    /// Trade a refresh token for a new bundle. Keeps the old refresh token if
    /// the provider does not rotate it.
    pub async fn refresh(&self, token: &TokenBundle) -> Result<TokenBundle, IdentityError> {
        let refresh_token = token.refresh_token.as_deref().ok_or(IdentityError::TokenRejected)?;

        let response = self
            .http
            .post(self.config.token_url())
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await?;

        if response.status() == StatusCode::BAD_REQUEST || response.status() == StatusCode::UNAUTHORIZED {
            warn!("Provider refused token refresh ({})", response.status());
            return Err(IdentityError::TokenRejected);
        }

        let fresh: TokenResponse = read_json(response).await?;
        debug!("Refreshed access token");
        Ok(fresh.into_bundle(Some(refresh_token)))
    }

    /// Bind a token to this client for API calls.
    pub fn session<U: TokenUpdater>(&self, token: TokenBundle, updater: U) -> ProviderSession<U> {
        ProviderSession {
            client: self.clone(),
            token,
            updater,
        }
    }
}

/// An authorized view of the provider API for one user.
pub struct ProviderSession<U> {
    client: DiscordClient,
    token: TokenBundle,
    updater: U,
}

impl<U: TokenUpdater> ProviderSession<U> {
    pub fn token(&self) -> &TokenBundle {
        &self.token
    }

    async fn ensure_fresh(&mut self) -> Result<(), IdentityError> {
        if self.token.is_expired(chrono::Utc::now()) && self.token.can_refresh() {
            let fresh = self.client.refresh(&self.token).await?;
            self.updater.update(&fresh);
            self.token = fresh;
        }
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&mut self, path: &str) -> Result<T, IdentityError> {
        self.ensure_fresh().await?;

        let response = self
            .client
            .http
            .get(self.client.config.endpoint(path))
            .header(
                header::AUTHORIZATION,
                format!("{} {}", self.token.token_type, self.token.access_token),
            )
            .send()
            .await?;

        read_json(response).await
    }

    pub async fn fetch_account(&mut self) -> Result<Account, IdentityError> {
        let user: UserResponse = self.get_json("/users/@me").await?;
        let id = user
            .id
            .parse::<u64>()
            .map_err(|e| IdentityError::Malformed(format!("user id '{}': {}", user.id, e)))?;

        Ok(Account {
            id,
            username: user.username,
        })
    }

    pub async fn fetch_groups(&mut self) -> Result<Vec<String>, IdentityError> {
        let guilds: Vec<GuildResponse> = self.get_json("/users/@me/guilds").await?;
        Ok(guilds.into_iter().map(|g| g.id).collect())
    }

    /// Role ids the user holds in `group_id`. Empty if the user is not a member.
    pub async fn fetch_group_roles(&mut self, group_id: &str) -> Result<Vec<String>, IdentityError> {
        let path = format!("/users/@me/guilds/{}/member", group_id);
        match self.get_json::<MemberResponse>(&path).await {
            Ok(member) => Ok(member.roles),
            Err(IdentityError::Provider { status: 404, .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, IdentityError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(IdentityError::TokenRejected);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(IdentityError::Provider {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| IdentityError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> DiscordClient {
        DiscordClient::new(OAuthConfig {
            client_id: "cid".into(),
            client_secret: "secret".into(),
            redirect_uri: "https://portal.example/discord/callback".into(),
            api_base: "https://discord.example/api/".into(),
        })
        .unwrap()
    }

    #[test]
    fn authorization_url_carries_client_scope_and_state() {
        let redirect = client()
            .begin_login(&["identify".to_string(), "guilds".to_string()])
            .unwrap();
        let url = Url::parse(&redirect.url).unwrap();

        assert_eq!(url.path(), "/api/oauth2/authorize");
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "cid");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["scope"], "identify guilds");
        assert_eq!(pairs["redirect_uri"], "https://portal.example/discord/callback");
        assert_eq!(pairs["state"], redirect.state);
    }

    #[test]
    fn each_login_gets_a_fresh_state() {
        let c = client();
        let a = c.begin_login(&[]).unwrap();
        let b = c.begin_login(&[]).unwrap();
        assert_ne!(a.state, b.state);
        assert_eq!(a.state.len(), 32);
    }

    #[test]
    fn bad_api_base_is_rejected() {
        let result = DiscordClient::new(OAuthConfig {
            client_id: "cid".into(),
            client_secret: "secret".into(),
            redirect_uri: "x".into(),
            api_base: "not a url".into(),
        });
        assert!(matches!(result, Err(IdentityError::Config(_))));
    }

    #[tokio::test]
    async fn callback_error_and_state_are_checked_before_any_request() {
        let c = client();

        let refused = CallbackParams {
            error: Some("access_denied".into()),
            ..Default::default()
        };
        assert!(matches!(
            c.complete_login(&refused, Some("s")).await,
            Err(IdentityError::AuthorizationRefused(_))
        ));

        let wrong_state = CallbackParams {
            code: Some("c".into()),
            state: Some("other".into()),
            ..Default::default()
        };
        assert!(matches!(
            c.complete_login(&wrong_state, Some("s")).await,
            Err(IdentityError::StateMismatch)
        ));
        assert!(matches!(
            c.complete_login(&wrong_state, None).await,
            Err(IdentityError::StateMismatch)
        ));

        let no_code = CallbackParams {
            state: Some("s".into()),
            ..Default::default()
        };
        assert!(matches!(
            c.complete_login(&no_code, Some("s")).await,
            Err(IdentityError::MissingCode)
        ));
    }
}
