//! Community membership gate.
//!
//! A login walks `Anonymous -> PendingCallback -> PendingMembershipCheck`
//! and ends either `Authorized` (session bound to the account) or back at
//! `Anonymous` after a denial. The decision itself only needs the caller's
//! guild list and, when a role restriction is configured, their roles in the
//! required guild, so it is written against [`MembershipSource`] rather than
//! the HTTP client.

use std::collections::HashSet;
use std::future::Future;

use tracing::{info, warn};

use portal_types::models::Account;

use crate::client::{ProviderSession, TokenUpdater};
use crate::error::IdentityError;

/// Where a browser session stands in the login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Anonymous,
    PendingCallback,
    PendingMembershipCheck,
    Authorized,
}

/// Which guild (and optionally which roles in it) a member must hold.
#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub guild_id: String,
    /// Empty means any member of the guild is admitted.
    pub required_roles: HashSet<String>,
}

impl GatePolicy {
    pub fn new(guild_id: impl Into<String>, required_roles: impl IntoIterator<Item = String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            required_roles: required_roles.into_iter().collect(),
        }
    }

    /// Scopes to request when the caller does not ask for specific ones.
    pub fn default_scopes(&self) -> Vec<String> {
        let mut scopes = vec!["identify".to_string(), "guilds".to_string()];
        if !self.required_roles.is_empty() {
            scopes.push("guilds.members.read".to_string());
        }
        scopes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotMember,
    MissingRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Authorized(Account),
    Denied(DenyReason),
}

/// Provider data the gate decides on.
pub trait MembershipSource {
    fn account(&mut self) -> impl Future<Output = Result<Account, IdentityError>> + Send;

    fn groups(&mut self) -> impl Future<Output = Result<Vec<String>, IdentityError>> + Send;

    fn group_roles(
        &mut self,
        group_id: &str,
    ) -> impl Future<Output = Result<Vec<String>, IdentityError>> + Send;
}

impl<U: TokenUpdater + Send> MembershipSource for ProviderSession<U> {
    async fn account(&mut self) -> Result<Account, IdentityError> {
        self.fetch_account().await
    }

    async fn groups(&mut self) -> Result<Vec<String>, IdentityError> {
        self.fetch_groups().await
    }

    async fn group_roles(&mut self, group_id: &str) -> Result<Vec<String>, IdentityError> {
        self.fetch_group_roles(group_id).await
    }
}

/// Run the membership check. Provider failures are errors, not denials.
pub async fn check_access<S: MembershipSource>(
    source: &mut S,
    policy: &GatePolicy,
) -> Result<GateDecision, IdentityError> {
    let groups = source.groups().await?;
    if !groups.iter().any(|g| *g == policy.guild_id) {
        warn!("Login denied: not a member of guild {}", policy.guild_id);
        return Ok(GateDecision::Denied(DenyReason::NotMember));
    }

    if !policy.required_roles.is_empty() {
        let roles = source.group_roles(&policy.guild_id).await?;
        if !roles.iter().any(|r| policy.required_roles.contains(r)) {
            warn!("Login denied: no required role in guild {}", policy.guild_id);
            return Ok(GateDecision::Denied(DenyReason::MissingRole));
        }
    }

    let account = source.account().await?;
    info!("{} ({}) passed the membership gate", account.username, account.id);
    Ok(GateDecision::Authorized(account))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        guilds: Vec<&'static str>,
        roles: Vec<&'static str>,
        role_lookups: usize,
        fail_groups: bool,
    }

    impl Fake {
        fn in_guilds(guilds: &[&'static str]) -> Self {
            Self {
                guilds: guilds.to_vec(),
                roles: Vec::new(),
                role_lookups: 0,
                fail_groups: false,
            }
        }
    }

    impl MembershipSource for Fake {
        async fn account(&mut self) -> Result<Account, IdentityError> {
            Ok(Account {
                id: 42,
                username: "alice".into(),
            })
        }

        async fn groups(&mut self) -> Result<Vec<String>, IdentityError> {
            if self.fail_groups {
                return Err(IdentityError::Provider {
                    status: 502,
                    body: "bad gateway".into(),
                });
            }
            Ok(self.guilds.iter().map(|g| g.to_string()).collect())
        }

        async fn group_roles(&mut self, _group_id: &str) -> Result<Vec<String>, IdentityError> {
            self.role_lookups += 1;
            Ok(self.roles.iter().map(|r| r.to_string()).collect())
        }
    }

    fn policy(roles: &[&str]) -> GatePolicy {
        GatePolicy::new("G1", roles.iter().map(|r| r.to_string()))
    }

    #[tokio::test]
    async fn member_of_required_guild_is_admitted() {
        let mut source = Fake::in_guilds(&["G1", "G2"]);
        let decision = check_access(&mut source, &policy(&[])).await.unwrap();
        assert_eq!(
            decision,
            GateDecision::Authorized(Account {
                id: 42,
                username: "alice".into()
            })
        );
        assert_eq!(source.role_lookups, 0);
    }

    #[tokio::test]
    async fn other_guilds_only_is_denied() {
        let mut source = Fake::in_guilds(&["G2"]);
        let decision = check_access(&mut source, &policy(&[])).await.unwrap();
        assert_eq!(decision, GateDecision::Denied(DenyReason::NotMember));
    }

    #[tokio::test]
    async fn role_restriction_requires_one_matching_role() {
        let mut source = Fake::in_guilds(&["G1"]);
        source.roles = vec!["R9"];
        let decision = check_access(&mut source, &policy(&["R1", "R2"])).await.unwrap();
        assert_eq!(decision, GateDecision::Denied(DenyReason::MissingRole));

        source.roles = vec!["R9", "R2"];
        let decision = check_access(&mut source, &policy(&["R1", "R2"])).await.unwrap();
        assert!(matches!(decision, GateDecision::Authorized(_)));
        assert_eq!(source.role_lookups, 2);
    }

    #[tokio::test]
    async fn provider_failure_is_an_error_not_a_denial() {
        let mut source = Fake::in_guilds(&["G1"]);
        source.fail_groups = true;
        assert!(check_access(&mut source, &policy(&[])).await.is_err());
    }

    #[test]
    fn role_scope_requested_only_when_needed() {
        assert_eq!(policy(&[]).default_scopes(), ["identify", "guilds"]);
        assert!(
            policy(&["R1"])
                .default_scopes()
                .contains(&"guilds.members.read".to_string())
        );
    }
}
