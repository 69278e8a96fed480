//! Search-then-bind user authentication.
//!
//! ## Security Requirements
//!
//! - The supplied password is never logged.
//! - Disabled accounts are excluded at the search filter, so they are
//!   indistinguishable from nonexistent accounts.
//! - An empty password is rejected outright: LDAP treats it as an
//!   unauthenticated bind (RFC 4513 §5.1.2), which would succeed without
//!   proving anything.
//! - The connection used for the user bind is discarded, never pooled.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use ldap3::{Scope, SearchEntry};

use crate::config::{DirectoryEndpoint, ACCOUNT_NAME_ATTRIBUTE, MEMBER_OF_ATTRIBUTE};
use crate::connection::DirectoryConnectionPoolManager;
use crate::error::{DirectoryError, DirectoryResult};
use crate::principal::{short_principal_name, Principal};

/// LDAP result code for a rejected simple bind.
const RC_INVALID_CREDENTIALS: u32 = 49;

/// A resolved directory entry; exists only within one authenticate call.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Short account name.
    pub account_name: String,
    /// Distinguished names of the groups the entry belongs to.
    pub groups: Vec<String>,
}

impl DirectoryEntry {
    /// Maps this entry to its principal set: one user principal plus one
    /// group principal per membership, each through the name normalizer.
    #[must_use]
    pub fn principals(&self) -> HashSet<Principal> {
        let mut principals = HashSet::with_capacity(1 + self.groups.len());
        principals.insert(Principal::user(short_principal_name(&self.account_name)));
        for group in &self.groups {
            principals.insert(Principal::group(short_principal_name(group)));
        }
        principals
    }
}

/// Verifies a username/password pair and produces the subject's principals.
///
/// The seam the login transaction depends on; stubbed in tests.
#[async_trait]
pub trait UserAuthenticator: Send + Sync {
    /// Authenticates `username` with `password`.
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> DirectoryResult<HashSet<Principal>>;
}

/// Authenticates users against Active Directory via search then bind.
#[derive(Debug)]
pub struct DirectoryUserAuthenticator {
    pools: Arc<DirectoryConnectionPoolManager>,
}

impl DirectoryUserAuthenticator {
    /// Creates an authenticator over the given pools.
    #[must_use]
    pub fn new(pools: Arc<DirectoryConnectionPoolManager>) -> Self {
        Self { pools }
    }

    fn endpoint(&self) -> &DirectoryEndpoint {
        self.pools.endpoint()
    }

    /// Resolves the user's directory entry through the lookup pool.
    async fn find_user(&self, username: &str) -> DirectoryResult<DirectoryEntry> {
        let mut lookup = self.pools.acquire_lookup().await?;

        let filter = self.endpoint().user_filter(username);
        let base_dn = self.endpoint().base_dn.clone();
        let outcome = lookup
            .ldap_mut()
            .with_timeout(self.endpoint().operation_timeout)
            .search(
                &base_dn,
                Scope::Subtree,
                &filter,
                vec![ACCOUNT_NAME_ATTRIBUTE, MEMBER_OF_ATTRIBUTE],
            )
            .await
            .and_then(ldap3::SearchResult::success);
        let (entries, _result) = match outcome {
            Ok(ok) => ok,
            Err(e) => {
                // A connection that failed or timed out mid-RPC is in an
                // unknown state and must not rejoin the pool.
                lookup.discard().await;
                return Err(DirectoryError::unavailable(format!(
                    "user search failed: {e}"
                )));
            }
        };

        let mut entries = entries.into_iter();
        let first = match entries.next() {
            Some(entry) => entry,
            None => return Err(DirectoryError::user_not_found(username)),
        };
        let extra = entries.count();
        if extra > 0 {
            // Fail closed instead of silently using an arbitrary entry.
            return Err(DirectoryError::AmbiguousMatch {
                username: username.to_string(),
                matches: 1 + extra,
            });
        }

        let entry = SearchEntry::construct(first);
        let account_name = entry
            .attrs
            .get(ACCOUNT_NAME_ATTRIBUTE)
            .and_then(|values| values.first())
            .cloned()
            .unwrap_or_else(|| username.to_string());
        let groups = entry.attrs.get(MEMBER_OF_ATTRIBUTE).cloned().unwrap_or_default();

        Ok(DirectoryEntry {
            dn: entry.dn,
            account_name,
            groups,
        })
    }

    /// Verifies the password with a simple bind on a transient connection.
    async fn verify_password(&self, user_dn: &str, password: &str) -> DirectoryResult<()> {
        let mut bind = self.pools.acquire_bind().await?;

        let result = bind
            .ldap_mut()
            .with_timeout(self.endpoint().operation_timeout)
            .simple_bind(user_dn, password)
            .await
            .map_err(|e| DirectoryError::unavailable(format!("bind request failed: {e}")));

        // The connection carried a user bind attempt; its state is no
        // longer pool-safe either way.
        let outcome = match result {
            Ok(res) if res.rc == 0 => Ok(()),
            Ok(res) => {
                tracing::debug!(
                    user_dn = %user_dn,
                    rc = res.rc,
                    invalid_credentials = res.rc == RC_INVALID_CREDENTIALS,
                    "user bind rejected"
                );
                Err(DirectoryError::InvalidCredentials)
            }
            Err(e) => Err(e),
        };
        bind.discard().await;

        outcome
    }
}

#[async_trait]
impl UserAuthenticator for DirectoryUserAuthenticator {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> DirectoryResult<HashSet<Principal>> {
        if password.is_empty() {
            tracing::debug!(username = %username, "rejecting empty password");
            return Err(DirectoryError::InvalidCredentials);
        }

        let entry = self.find_user(username).await?;
        self.verify_password(&entry.dn, password).await?;

        let principals = entry.principals();
        tracing::debug!(
            username = %username,
            dn = %entry.dn,
            principals = principals.len(),
            "authenticated directory user"
        );
        Ok(principals)
    }
}
