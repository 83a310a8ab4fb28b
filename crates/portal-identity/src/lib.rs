pub mod client;
pub mod error;
pub mod gate;

pub use client::{CallbackParams, DiscordClient, LoginRedirect, OAuthConfig, ProviderSession, TokenUpdater};
pub use error::IdentityError;
pub use gate::{DenyReason, GateDecision, GatePolicy, GateState, MembershipSource, check_access};
