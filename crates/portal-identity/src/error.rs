use thiserror::Error;

/// Failures talking to the identity provider. None of these is an
/// authorization denial; denials are reported as [`crate::GateDecision::Denied`].
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Provider rejected the access token")]
    TokenRejected,

    #[error("Authorization was refused: {0}")]
    AuthorizationRefused(String),

    #[error("OAuth state mismatch")]
    StateMismatch,

    #[error("Callback is missing the authorization code")]
    MissingCode,

    #[error("Malformed provider data: {0}")]
    Malformed(String),

    #[error("Invalid OAuth configuration: {0}")]
    Config(String),
}
