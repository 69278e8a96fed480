//! Directory endpoint configuration.
//!
//! The endpoint is immutable after construction and owned by the pool
//! manager. Validation happens at build time; a provider with an invalid
//! endpoint refuses to start.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DirectoryError, DirectoryResult};

/// Attribute holding the account short name.
pub const ACCOUNT_NAME_ATTRIBUTE: &str = "sAMAccountName";

/// Attribute listing group membership DNs.
pub const MEMBER_OF_ATTRIBUTE: &str = "memberOf";

// ============================================================================
// Control Flag
// ============================================================================

/// How the hosting framework composes this provider with others.
///
/// Parsed from host configuration and handed back to the host; this crate
/// never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlFlag {
    /// The provider must succeed; the chain continues regardless.
    Required,
    /// The provider may fail without failing the chain.
    Optional,
    /// Success short-circuits the chain.
    Sufficient,
    /// Failure aborts the chain immediately.
    Requisite,
}

impl ControlFlag {
    /// Returns the configuration string for this flag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "REQUIRED",
            Self::Optional => "OPTIONAL",
            Self::Sufficient => "SUFFICIENT",
            Self::Requisite => "REQUISITE",
        }
    }
}

impl FromStr for ControlFlag {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "REQUIRED" => Ok(Self::Required),
            "OPTIONAL" => Ok(Self::Optional),
            "SUFFICIENT" => Ok(Self::Sufficient),
            "REQUISITE" => Ok(Self::Requisite),
            other => Err(DirectoryError::configuration(format!(
                "invalid control flag: {other}"
            ))),
        }
    }
}

impl fmt::Display for ControlFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Directory Endpoint
// ============================================================================

/// Connection parameters for one Active Directory endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEndpoint {
    /// Directory server host.
    pub host: String,

    /// Directory server port.
    pub port: u16,

    /// Base DN for the subtree user search.
    pub base_dn: String,

    /// DN of the service identity used by the lookup pool.
    pub bind_dn: String,

    /// Service identity credential.
    #[serde(skip_serializing)]
    pub bind_credential: String,

    /// Capacity of each connection pool.
    pub pool_size: usize,

    /// Whether connections negotiate TLS.
    pub tls_enabled: bool,

    /// Name of the trust realm validating server certificates.
    pub trust_realm: Option<String>,

    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,

    /// How long an acquire may wait on an exhausted pool.
    pub acquire_timeout: Duration,

    /// Deadline for a single directory RPC (search or bind).
    pub operation_timeout: Duration,

    /// Period between liveness probes of idle connections.
    pub probe_period: Duration,
}

impl DirectoryEndpoint {
    /// Creates a new endpoint builder.
    #[must_use]
    pub fn builder() -> DirectoryEndpointBuilder {
        DirectoryEndpointBuilder::new()
    }

    /// Returns the connection URL for this endpoint.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.tls_enabled { "ldaps" } else { "ldap" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Builds the user lookup filter for `username`.
    ///
    /// Matches enabled person/user entries by account name; the
    /// disabled-account bit of `userAccountControl` is excluded at the
    /// filter so disabled accounts are indistinguishable from nonexistent
    /// ones.
    #[must_use]
    pub fn user_filter(&self, username: &str) -> String {
        let escaped = ldap_escape(username);
        format!(
            "(&(&(objectCategory=person)(objectClass=user)({ACCOUNT_NAME_ATTRIBUTE}={escaped}))\
             (!(userAccountControl:1.2.840.113556.1.4.803:=2)))"
        )
    }

    /// Validates the endpoint.
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.host.is_empty() {
            return Err(DirectoryError::configuration("host cannot be empty"));
        }
        if self.port == 0 {
            return Err(DirectoryError::configuration("port cannot be 0"));
        }
        if self.base_dn.is_empty() {
            return Err(DirectoryError::configuration("base_dn cannot be empty"));
        }
        if self.bind_dn.is_empty() {
            return Err(DirectoryError::configuration("bind_dn cannot be empty"));
        }
        if self.pool_size < 1 {
            return Err(DirectoryError::configuration("pool_size must be at least 1"));
        }
        if self.tls_enabled && self.trust_realm.is_none() {
            return Err(DirectoryError::configuration(
                "trust_realm is required when TLS is enabled",
            ));
        }
        Ok(())
    }
}

/// Escapes special characters in LDAP filter values (RFC 4515).
pub(crate) fn ldap_escape(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\5c"),
            '*' => result.push_str("\\2a"),
            '(' => result.push_str("\\28"),
            ')' => result.push_str("\\29"),
            '\0' => result.push_str("\\00"),
            _ => result.push(c),
        }
    }
    result
}

// ============================================================================
// Endpoint Builder
// ============================================================================

/// Builder for [`DirectoryEndpoint`].
#[derive(Debug, Default)]
pub struct DirectoryEndpointBuilder {
    host: Option<String>,
    port: u16,
    base_dn: Option<String>,
    bind_dn: Option<String>,
    bind_credential: Option<String>,
    pool_size: usize,
    tls_enabled: bool,
    trust_realm: Option<String>,
    connect_timeout: Option<Duration>,
    acquire_timeout: Option<Duration>,
    operation_timeout: Option<Duration>,
    probe_period: Option<Duration>,
}

impl DirectoryEndpointBuilder {
    /// Creates a new builder with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            port: 389,
            pool_size: 10,
            ..Self::default()
        }
    }

    /// Sets the directory host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the directory port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the base DN for user searches.
    #[must_use]
    pub fn base_dn(mut self, dn: impl Into<String>) -> Self {
        self.base_dn = Some(dn.into());
        self
    }

    /// Sets the service bind DN.
    #[must_use]
    pub fn bind_dn(mut self, dn: impl Into<String>) -> Self {
        self.bind_dn = Some(dn.into());
        self
    }

    /// Sets the service bind credential.
    #[must_use]
    pub fn bind_credential(mut self, credential: impl Into<String>) -> Self {
        self.bind_credential = Some(credential.into());
        self
    }

    /// Sets the per-pool connection capacity.
    #[must_use]
    pub const fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Enables TLS with the given trust realm.
    #[must_use]
    pub fn tls(mut self, trust_realm: impl Into<String>) -> Self {
        self.tls_enabled = true;
        self.trust_realm = Some(trust_realm.into());
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the pool acquire timeout.
    #[must_use]
    pub const fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Sets the per-RPC operation deadline.
    #[must_use]
    pub const fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Sets the idle-connection probe period.
    #[must_use]
    pub const fn probe_period(mut self, period: Duration) -> Self {
        self.probe_period = Some(period);
        self
    }

    /// Builds and validates the endpoint.
    ///
    /// ## Errors
    ///
    /// Returns `DirectoryError::Configuration` if required fields are
    /// missing, the pool size is below 1, or TLS is enabled without a
    /// trust realm.
    pub fn build(self) -> DirectoryResult<DirectoryEndpoint> {
        let endpoint = DirectoryEndpoint {
            host: self
                .host
                .ok_or_else(|| DirectoryError::configuration("host is required"))?,
            port: self.port,
            base_dn: self
                .base_dn
                .ok_or_else(|| DirectoryError::configuration("base_dn is required"))?,
            bind_dn: self
                .bind_dn
                .ok_or_else(|| DirectoryError::configuration("bind_dn is required"))?,
            bind_credential: self
                .bind_credential
                .ok_or_else(|| DirectoryError::configuration("bind_credential is required"))?,
            pool_size: self.pool_size,
            tls_enabled: self.tls_enabled,
            trust_realm: self.trust_realm,
            connect_timeout: self.connect_timeout.unwrap_or(Duration::from_secs(5)),
            acquire_timeout: self.acquire_timeout.unwrap_or(Duration::from_secs(10)),
            operation_timeout: self.operation_timeout.unwrap_or(Duration::from_secs(10)),
            probe_period: self.probe_period.unwrap_or(Duration::from_secs(30)),
        };

        endpoint.validate()?;

        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_builder() -> DirectoryEndpointBuilder {
        DirectoryEndpoint::builder()
            .host("ad.example.com")
            .port(636)
            .base_dn("DC=example,DC=com")
            .bind_dn("CN=svc-lookup,OU=Service,DC=example,DC=com")
            .bind_credential("secret")
    }

    #[test]
    fn builds_valid_endpoint() {
        let endpoint = base_builder().pool_size(4).build().unwrap();
        assert_eq!(endpoint.pool_size, 4);
        assert_eq!(endpoint.url(), "ldap://ad.example.com:636");
    }

    #[test]
    fn tls_endpoint_uses_ldaps_scheme() {
        let endpoint = base_builder().tls("corp").build().unwrap();
        assert_eq!(endpoint.url(), "ldaps://ad.example.com:636");
        assert_eq!(endpoint.trust_realm.as_deref(), Some("corp"));
    }

    #[test]
    fn rejects_missing_host() {
        let result = DirectoryEndpoint::builder()
            .base_dn("DC=example,DC=com")
            .bind_dn("CN=svc,DC=example,DC=com")
            .bind_credential("secret")
            .build();
        assert!(matches!(result, Err(DirectoryError::Configuration(_))));
    }

    #[test]
    fn rejects_zero_pool_size() {
        let result = base_builder().pool_size(0).build();
        assert!(matches!(result, Err(DirectoryError::Configuration(_))));
    }

    #[test]
    fn rejects_zero_port() {
        let result = base_builder().port(0).build();
        assert!(matches!(result, Err(DirectoryError::Configuration(_))));
    }

    #[test]
    fn operation_timeout_defaults_and_overrides() {
        let endpoint = base_builder().build().unwrap();
        assert_eq!(endpoint.operation_timeout, Duration::from_secs(10));

        let endpoint = base_builder()
            .operation_timeout(Duration::from_millis(250))
            .build()
            .unwrap();
        assert_eq!(endpoint.operation_timeout, Duration::from_millis(250));
    }

    #[test]
    fn user_filter_excludes_disabled_accounts() {
        let endpoint = base_builder().build().unwrap();
        let filter = endpoint.user_filter("jdoe");
        assert!(filter.contains("(sAMAccountName=jdoe)"));
        assert!(filter.contains("(objectCategory=person)"));
        assert!(filter.contains("(!(userAccountControl:1.2.840.113556.1.4.803:=2))"));
    }

    #[test]
    fn user_filter_escapes_metacharacters() {
        let endpoint = base_builder().build().unwrap();
        let filter = endpoint.user_filter("j*(doe)\\");
        assert!(filter.contains("(sAMAccountName=j\\2a\\28doe\\29\\5c)"));
    }

    #[test]
    fn control_flag_parsing() {
        assert_eq!("required".parse::<ControlFlag>().unwrap(), ControlFlag::Required);
        assert_eq!("SUFFICIENT".parse::<ControlFlag>().unwrap(), ControlFlag::Sufficient);
        assert_eq!("Optional".parse::<ControlFlag>().unwrap(), ControlFlag::Optional);
        assert_eq!("REQUISITE".parse::<ControlFlag>().unwrap(), ControlFlag::Requisite);
        assert!("ALWAYS".parse::<ControlFlag>().is_err());
    }

    #[test]
    fn ldap_escape_special_chars() {
        assert_eq!(ldap_escape("john*"), "john\\2a");
        assert_eq!(ldap_escape("(admin)"), "\\28admin\\29");
        assert_eq!(ldap_escape("user\\name"), "user\\5cname");
        assert_eq!(ldap_escape("normal"), "normal");
    }
}
