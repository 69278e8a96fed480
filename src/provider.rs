//! Provider boundary for hosting frameworks.
//!
//! A [`DirectoryAuthProvider`] owns the process-wide collaborators (the
//! connection pools and the authenticator) and mints one
//! [`LoginTransaction`] per login attempt. Initialization is fail-fast:
//! an invalid configuration refuses to start rather than surfacing later
//! as per-login failures.

use std::sync::Arc;

use crate::authenticator::{DirectoryUserAuthenticator, UserAuthenticator};
use crate::config::{ControlFlag, DirectoryEndpoint};
use crate::connection::DirectoryConnectionPoolManager;
use crate::error::DirectoryResult;
use crate::transaction::{CredentialSource, LoginTransaction, SharedSubject};
use crate::trust::RealmTrustValidator;

/// Active Directory search-then-bind authentication provider.
#[derive(Debug)]
pub struct DirectoryAuthProvider {
    description: String,
    control_flag: ControlFlag,
    pools: Arc<DirectoryConnectionPoolManager>,
    authenticator: Arc<DirectoryUserAuthenticator>,
}

impl DirectoryAuthProvider {
    /// Initializes the provider for one directory endpoint.
    ///
    /// Builds the connection pools and the authenticator; connections are
    /// established lazily on first login.
    ///
    /// ## Errors
    ///
    /// Returns `DirectoryError::Configuration` if the endpoint is invalid
    /// or TLS is enabled without a matching trust validator.
    pub fn initialize(
        endpoint: DirectoryEndpoint,
        control_flag: ControlFlag,
        trust: Option<Arc<RealmTrustValidator>>,
    ) -> DirectoryResult<Self> {
        let description = format!(
            "Active Directory search-then-bind authentication provider v{}",
            env!("CARGO_PKG_VERSION")
        );
        tracing::debug!(
            endpoint = %endpoint.url(),
            control_flag = %control_flag,
            "initializing directory authentication provider"
        );

        let pools = Arc::new(DirectoryConnectionPoolManager::initialize(endpoint, trust)?);
        let authenticator = Arc::new(DirectoryUserAuthenticator::new(Arc::clone(&pools)));

        Ok(Self {
            description,
            control_flag,
            pools,
            authenticator,
        })
    }

    /// Returns the human-readable provider description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the chain-composition flag handed back to the host.
    #[must_use]
    pub const fn control_flag(&self) -> ControlFlag {
        self.control_flag
    }

    /// Mints a login transaction for one authentication attempt.
    ///
    /// The transaction shares this provider's pools; the subject and the
    /// credential source belong to the attempt.
    #[must_use]
    pub fn login(
        &self,
        subject: SharedSubject,
        credentials: Box<dyn CredentialSource>,
    ) -> LoginTransaction {
        let authenticator = Arc::clone(&self.authenticator);
        let authenticator: Arc<dyn UserAuthenticator> = authenticator;
        LoginTransaction::new(subject, credentials, authenticator)
    }

    /// Shuts the provider down, closing the pools.
    ///
    /// In-flight transactions fail their next directory operation with an
    /// availability error.
    pub async fn shutdown(&self) {
        tracing::debug!(endpoint = %self.pools.endpoint().url(), "shutting down directory authentication provider");
        self.pools.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DirectoryError, LoginError};
    use crate::transaction::{LoginState, StaticCredentials, Subject};
    use parking_lot::Mutex;
    use std::time::Duration;

    fn endpoint() -> DirectoryEndpoint {
        DirectoryEndpoint::builder()
            .host("127.0.0.1")
            .port(1)
            .base_dn("DC=example,DC=com")
            .bind_dn("CN=svc,DC=example,DC=com")
            .bind_credential("secret")
            .connect_timeout(Duration::from_millis(200))
            .acquire_timeout(Duration::from_millis(500))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn initialize_reports_description_and_flag() {
        let provider =
            DirectoryAuthProvider::initialize(endpoint(), ControlFlag::Sufficient, None).unwrap();
        assert!(provider
            .description()
            .starts_with("Active Directory search-then-bind authentication provider v"));
        assert_eq!(provider.control_flag(), ControlFlag::Sufficient);
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn tls_without_validator_refuses_to_start() {
        let endpoint = DirectoryEndpoint::builder()
            .host("ad.example.com")
            .port(636)
            .base_dn("DC=example,DC=com")
            .bind_dn("CN=svc,DC=example,DC=com")
            .bind_credential("secret")
            .tls("corp")
            .build()
            .unwrap();

        let err =
            DirectoryAuthProvider::initialize(endpoint, ControlFlag::Required, None).unwrap_err();
        assert!(matches!(err, DirectoryError::Configuration(_)));
    }

    #[tokio::test]
    async fn login_against_unreachable_directory_fails_generically() {
        let provider =
            DirectoryAuthProvider::initialize(endpoint(), ControlFlag::Required, None).unwrap();
        let subject = Arc::new(Mutex::new(Subject::new()));
        let mut txn = provider.login(
            Arc::clone(&subject),
            Box::new(StaticCredentials::new("jdoe", "hunter2")),
        );

        let err = txn.authenticate().await.unwrap_err();
        assert!(matches!(err, LoginError::AuthenticationFailed));
        assert_eq!(txn.state(), LoginState::Failed);
        assert!(matches!(
            txn.diagnostic(),
            Some(DirectoryError::Unavailable(_))
        ));
        assert!(subject.lock().principals().is_empty());
        provider.shutdown().await;
    }
}
