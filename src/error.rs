//! Error types for directory authentication.
//!
//! ## Security Note
//!
//! Two layers of errors exist deliberately. [`DirectoryError`] carries the
//! full failure detail and stays inside the crate (and in the transaction's
//! diagnostic record). [`LoginError`] is what a caller sees: user-state
//! failures are collapsed into one generic kind so error differences cannot
//! be used to enumerate valid accounts.

use thiserror::Error;

use crate::transaction::LoginState;

/// Errors raised by the directory layer (pools, search, bind, trust).
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Invalid configuration; the provider refuses to start.
    #[error("directory configuration error: {0}")]
    Configuration(String),

    /// The directory could not be reached, or a pooled connection could not
    /// be obtained within the configured wait.
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    /// No enabled account matched the search. Disabled accounts are filtered
    /// at the search layer and land here as well.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The account search returned more than one entry. The lookup fails
    /// closed rather than picking an arbitrary entry.
    #[error("ambiguous account match for {username}: {matches} entries")]
    AmbiguousMatch {
        /// The account name that was searched for.
        username: String,
        /// How many entries the search returned.
        matches: usize,
    },

    /// The user bind was rejected.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// TLS trust validation of the server certificate chain failed.
    #[error("certificate validation failed: {0}")]
    CertificateValidation(String),

    /// A deliberately unimplemented trust-manager capability was invoked.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl DirectoryError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates an unavailability error.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Creates a user-not-found error.
    #[must_use]
    pub fn user_not_found(username: impl Into<String>) -> Self {
        Self::UserNotFound(username.into())
    }

    /// Creates a certificate validation error.
    #[must_use]
    pub fn certificate(msg: impl Into<String>) -> Self {
        Self::CertificateValidation(msg.into())
    }

    /// Checks whether this error reflects the state of the presented
    /// credentials or account rather than an operational problem.
    #[must_use]
    pub const fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            Self::UserNotFound(_) | Self::AmbiguousMatch { .. } | Self::InvalidCredentials
        )
    }
}

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Errors surfaced by a [`LoginTransaction`](crate::transaction::LoginTransaction).
#[derive(Debug, Error)]
pub enum LoginError {
    /// Generic authentication failure. Covers unknown accounts, disabled
    /// accounts, ambiguous matches, wrong passwords and directory outages
    /// alike; the distinguishing detail is kept in the transaction's
    /// diagnostic record only.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// TLS trust failure. Not collapsed: it indicates a trust problem
    /// between this host and the directory, not user credential state.
    #[error("certificate validation failed: {0}")]
    CertificateValidation(String),

    /// The credential source could not supply a username or password.
    #[error("credentials unavailable: {0}")]
    CredentialsUnavailable(String),

    /// The operation is not valid in the transaction's current state.
    #[error("{operation} is not valid in the {state} state")]
    InvalidState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the transaction was in.
        state: LoginState,
    },
}

/// Result type for login transaction operations.
pub type LoginResult<T> = Result<T, LoginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_failures_are_classified() {
        assert!(DirectoryError::user_not_found("jdoe").is_credential_failure());
        assert!(DirectoryError::InvalidCredentials.is_credential_failure());
        assert!(DirectoryError::AmbiguousMatch {
            username: "jdoe".to_string(),
            matches: 2,
        }
        .is_credential_failure());

        assert!(!DirectoryError::unavailable("refused").is_credential_failure());
        assert!(!DirectoryError::certificate("expired").is_credential_failure());
        assert!(!DirectoryError::configuration("no host").is_credential_failure());
    }

    #[test]
    fn generic_failure_reveals_nothing() {
        let msg = LoginError::AuthenticationFailed.to_string();
        assert_eq!(msg, "authentication failed");
    }
}
