//! Active Directory search-then-bind authentication.
//!
//! This crate verifies username/password credentials against an Active
//! Directory endpoint: a service-bound connection resolves the account's
//! distinguished name and group memberships with a subtree search, then a
//! separate anonymous connection attempts a simple bind as that DN. Both
//! connection kinds come from bounded, process-wide pools. On success the
//! account maps to one user principal plus one group principal per
//! membership; the whole set is staged in a [`LoginTransaction`] and
//! reaches the caller-owned subject only at commit.
//!
//! Server certificates on TLS endpoints are validated against a named
//! trust realm, a pinned set of trust anchors independent of the system
//! store.
//!
//! ## Security Notes
//!
//! - Disabled accounts are excluded at the search filter and empty
//!   passwords are rejected before any network traffic.
//! - All credential-state failures collapse into one generic
//!   [`LoginError::AuthenticationFailed`]; the distinguishing detail stays
//!   in the transaction's diagnostic record for operators.
//! - Connections that carried a user bind are discarded, never pooled.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod authenticator;
pub mod config;
pub mod connection;
pub mod error;
pub mod principal;
pub mod provider;
pub mod transaction;
pub mod trust;

pub use authenticator::{DirectoryUserAuthenticator, UserAuthenticator};
pub use config::{ControlFlag, DirectoryEndpoint, DirectoryEndpointBuilder};
pub use connection::DirectoryConnectionPoolManager;
pub use error::{DirectoryError, DirectoryResult, LoginError, LoginResult};
pub use principal::{short_principal_name, Principal, PrincipalKind};
pub use provider::DirectoryAuthProvider;
pub use transaction::{
    CredentialError, CredentialSource, LoginState, LoginTransaction, SharedSubject,
    StaticCredentials, Subject,
};
pub use trust::{RealmTrustValidator, TrustRealm};
