//! Per-attempt login transaction.
//!
//! A [`LoginTransaction`] gates one authentication attempt: it pulls the
//! credentials, invokes the authenticator, and stages the resulting
//! principal set. Only `commit()` mutates the caller-owned subject, and
//! `abort()` removes exactly what a prior commit added, so the subject is
//! never left partially mutated.
//!
//! ## Security Note
//!
//! Every authentication failure surfaces as the one generic
//! [`LoginError::AuthenticationFailed`]; whether the account was unknown,
//! disabled, ambiguous, or the password wrong is recorded only in the
//! transaction's diagnostic record. Collapsing these prevents account
//! enumeration through differentiated error messages.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::authenticator::UserAuthenticator;
use crate::error::{DirectoryError, LoginError, LoginResult};
use crate::principal::Principal;

// ============================================================================
// Subject
// ============================================================================

/// The caller-owned identity container.
///
/// This crate never constructs or destroys a subject; it only adds the
/// principals it produced inside `commit()` and removes exactly those in
/// `abort()`.
#[derive(Debug, Default)]
pub struct Subject {
    principals: HashSet<Principal>,
}

impl Subject {
    /// Creates an empty subject.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the principals attached to this subject.
    #[must_use]
    pub fn principals(&self) -> &HashSet<Principal> {
        &self.principals
    }

    /// Checks whether the subject carries the given principal.
    #[must_use]
    pub fn contains(&self, principal: &Principal) -> bool {
        self.principals.contains(principal)
    }

    /// Attaches a principal; the host may seed subjects before login.
    pub fn attach(&mut self, principal: Principal) {
        self.principals.insert(principal);
    }

    fn attach_all(&mut self, principals: &HashSet<Principal>) {
        self.principals.extend(principals.iter().cloned());
    }

    fn detach_all(&mut self, principals: &HashSet<Principal>) {
        for principal in principals {
            self.principals.remove(principal);
        }
    }
}

/// A subject shared between the host and in-flight login transactions.
pub type SharedSubject = Arc<Mutex<Subject>>;

// ============================================================================
// Credential Source
// ============================================================================

/// Failure to obtain a credential from the source.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CredentialError(pub String);

/// Pull-based, single-use credential capability.
///
/// Each method is invoked exactly once per attempt; the transaction never
/// caches what it pulls beyond the one authenticate call.
pub trait CredentialSource: Send {
    /// Yields the username for this attempt.
    fn take_username(&mut self) -> Result<String, CredentialError>;

    /// Yields the password for this attempt.
    fn take_password(&mut self) -> Result<String, CredentialError>;
}

/// A credential source holding one prefetched pair.
///
/// Single-use: each value can be taken once, a second take fails.
#[derive(Debug)]
pub struct StaticCredentials {
    username: Option<String>,
    password: Option<String>,
}

impl StaticCredentials {
    /// Creates a source for one username/password pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }
}

impl CredentialSource for StaticCredentials {
    fn take_username(&mut self) -> Result<String, CredentialError> {
        self.username
            .take()
            .ok_or_else(|| CredentialError("username already consumed".to_string()))
    }

    fn take_password(&mut self) -> Result<String, CredentialError> {
        self.password
            .take()
            .ok_or_else(|| CredentialError("password already consumed".to_string()))
    }
}

// ============================================================================
// Login Transaction
// ============================================================================

/// States of one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoginState {
    /// Wired up, no I/O performed yet.
    Initialized,
    /// Credentials verified; principals staged but not committed.
    Authenticated,
    /// Staged principals merged into the subject.
    Committed,
    /// The attempt was rolled back.
    Aborted,
    /// Authentication failed.
    Failed,
    /// Terminal state.
    LoggedOut,
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialized => "INITIALIZED",
            Self::Authenticated => "AUTHENTICATED",
            Self::Committed => "COMMITTED",
            Self::Aborted => "ABORTED",
            Self::Failed => "FAILED",
            Self::LoggedOut => "LOGGED_OUT",
        };
        f.write_str(name)
    }
}

/// One login attempt over a caller-owned subject.
///
/// Exclusive to its attempt: created per login, never shared, and its
/// methods are not meant to be invoked concurrently.
pub struct LoginTransaction {
    subject: SharedSubject,
    credentials: Box<dyn CredentialSource>,
    authenticator: Arc<dyn UserAuthenticator>,
    staged: HashSet<Principal>,
    state: LoginState,
    committed: bool,
    diagnostic: Option<DirectoryError>,
}

impl LoginTransaction {
    /// Wires a transaction to its collaborators. No I/O.
    #[must_use]
    pub fn new(
        subject: SharedSubject,
        credentials: Box<dyn CredentialSource>,
        authenticator: Arc<dyn UserAuthenticator>,
    ) -> Self {
        Self {
            subject,
            credentials,
            authenticator,
            staged: HashSet::new(),
            state: LoginState::Initialized,
            committed: false,
            diagnostic: None,
        }
    }

    /// Returns the transaction's current state.
    #[must_use]
    pub const fn state(&self) -> LoginState {
        self.state
    }

    /// Returns the principals staged by a successful authenticate call.
    #[must_use]
    pub fn staged_principals(&self) -> &HashSet<Principal> {
        &self.staged
    }

    /// Returns the internal diagnostic record for a failed attempt.
    ///
    /// Operator-facing only; callers must not relay this to the end user.
    #[must_use]
    pub fn diagnostic(&self) -> Option<&DirectoryError> {
        self.diagnostic.as_ref()
    }

    /// Pulls the credentials and verifies them against the directory.
    ///
    /// Success stages the principal set; the subject is not touched until
    /// `commit()`. A credential-retrieval failure abandons the attempt
    /// without state loss to the subject.
    ///
    /// ## Errors
    ///
    /// Any verification failure surfaces as the generic
    /// `LoginError::AuthenticationFailed`; trust failures surface as
    /// `LoginError::CertificateValidation`.
    pub async fn authenticate(&mut self) -> LoginResult<()> {
        if self.state != LoginState::Initialized {
            return Err(LoginError::InvalidState {
                operation: "authenticate",
                state: self.state,
            });
        }

        let username = self
            .credentials
            .take_username()
            .map_err(|e| LoginError::CredentialsUnavailable(e.to_string()))?;
        let password = self
            .credentials
            .take_password()
            .map_err(|e| LoginError::CredentialsUnavailable(e.to_string()))?;

        match self.authenticator.authenticate(&username, &password).await {
            Ok(principals) => {
                tracing::debug!(
                    username = %username,
                    principals = principals.len(),
                    "login attempt authenticated"
                );
                self.staged = principals;
                self.state = LoginState::Authenticated;
                Ok(())
            }
            Err(err) => {
                self.state = LoginState::Failed;
                let surfaced = match &err {
                    DirectoryError::CertificateValidation(msg) => {
                        LoginError::CertificateValidation(msg.clone())
                    }
                    _ => {
                        // Full context for operators; one generic kind for
                        // callers.
                        tracing::warn!(username = %username, cause = %err, "login attempt failed");
                        LoginError::AuthenticationFailed
                    }
                };
                self.diagnostic = Some(err);
                Err(surfaced)
            }
        }
    }

    /// Merges the staged principals into the subject.
    ///
    /// Idempotent: committing an already-committed transaction is a no-op.
    ///
    /// ## Errors
    ///
    /// Returns `LoginError::InvalidState` unless a successful
    /// authenticate preceded this call.
    pub fn commit(&mut self) -> LoginResult<()> {
        match self.state {
            LoginState::Authenticated => {
                self.subject.lock().attach_all(&self.staged);
                self.committed = true;
                self.state = LoginState::Committed;
                Ok(())
            }
            LoginState::Committed => Ok(()),
            state => Err(LoginError::InvalidState {
                operation: "commit",
                state,
            }),
        }
    }

    /// Rolls the attempt back.
    ///
    /// If a commit happened, removes exactly the staged principals from
    /// the subject and nothing else. Always succeeds, including before any
    /// authenticate or commit.
    pub fn abort(&mut self) {
        if self.committed {
            self.subject.lock().detach_all(&self.staged);
            self.committed = false;
        }
        self.staged.clear();
        self.state = LoginState::Aborted;
    }

    /// Terminal no-op; the subject's further lifecycle is the caller's.
    pub fn logout(&mut self) {
        self.state = LoginState::LoggedOut;
    }
}

impl fmt::Debug for LoginTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginTransaction")
            .field("state", &self.state)
            .field("staged", &self.staged.len())
            .field("committed", &self.committed)
            .finish_non_exhaustive()
    }
}
