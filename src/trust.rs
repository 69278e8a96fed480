//! Realm-scoped TLS trust validation.
//!
//! ## Security Requirements
//!
//! Server certificate chains are validated against the trust anchors of a
//! named realm: every certificate must be inside its validity window, the
//! chain must be correctly ordered and signed link by link, and the
//! terminal certificate must be anchored in the realm. Client certificate
//! validation and accepted-issuer enumeration are deliberately unsupported
//! and fail explicitly instead of succeeding silently.

use std::sync::Arc;
use std::time::SystemTime;

use base64::Engine;
use once_cell::sync::OnceCell;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{DirectoryError, DirectoryResult};

// ============================================================================
// Trust Realm
// ============================================================================

/// A named set of trust anchors.
#[derive(Debug, Clone)]
pub struct TrustRealm {
    name: String,
    anchors_der: Vec<Vec<u8>>,
}

impl TrustRealm {
    /// Creates a realm from DER-encoded anchor certificates.
    #[must_use]
    pub fn new(name: impl Into<String>, anchors_der: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            anchors_der,
        }
    }

    /// Creates a realm from a PEM bundle of anchor certificates.
    ///
    /// ## Errors
    ///
    /// Returns `DirectoryError::Configuration` if the bundle contains no
    /// certificate blocks or a block is not valid base64.
    pub fn from_pem(name: impl Into<String>, pem: &str) -> DirectoryResult<Self> {
        let anchors = pem_certificates(pem)?;
        if anchors.is_empty() {
            return Err(DirectoryError::configuration(
                "trust realm PEM bundle contains no certificates",
            ));
        }
        Ok(Self::new(name, anchors))
    }

    /// Returns the realm name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Extracts all DER certificates from a PEM bundle.
fn pem_certificates(pem: &str) -> DirectoryResult<Vec<Vec<u8>>> {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";

    let mut certs = Vec::new();
    let mut rest = pem;
    while let Some(start) = rest.find(BEGIN) {
        let body_start = start + BEGIN.len();
        let end = rest[body_start..].find(END).ok_or_else(|| {
            DirectoryError::configuration("unterminated certificate block in PEM bundle")
        })?;
        let b64: String = rest[body_start..body_start + end]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let der = base64::engine::general_purpose::STANDARD
            .decode(&b64)
            .map_err(|e| {
                DirectoryError::configuration(format!("invalid certificate PEM: {e}"))
            })?;
        certs.push(der);
        rest = &rest[body_start + end + END.len()..];
    }
    Ok(certs)
}

// ============================================================================
// Trust Validator
// ============================================================================

/// Cached per-anchor lookup data, built lazily on first validation.
#[derive(Debug)]
struct AnchorIndex {
    /// DER and raw subject bytes, parallel to the realm's anchor list.
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

/// Validates server certificate chains against one realm's trust anchors.
///
/// Process-wide: constructed once per realm at provider initialization and
/// shared by every TLS handshake, never re-created per connection.
#[derive(Debug)]
pub struct RealmTrustValidator {
    realm: TrustRealm,
    index: OnceCell<AnchorIndex>,
}

impl RealmTrustValidator {
    /// Creates a validator for the given realm.
    #[must_use]
    pub fn new(realm: TrustRealm) -> Self {
        Self {
            realm,
            index: OnceCell::new(),
        }
    }

    /// Returns the name of the realm this validator trusts.
    #[must_use]
    pub fn realm_name(&self) -> &str {
        self.realm.name()
    }

    /// Validates a server certificate chain, leaf first.
    ///
    /// ## Errors
    ///
    /// Returns `DirectoryError::CertificateValidation` wrapping the cause
    /// if the chain is empty or malformed, a certificate is outside its
    /// validity window, a link is not signed by its successor, or the
    /// terminal certificate is not anchored in the realm.
    pub fn check_server_trusted(&self, chain: &[&[u8]]) -> DirectoryResult<()> {
        if chain.is_empty() {
            return Err(DirectoryError::certificate(format!(
                "empty certificate chain presented to realm {}",
                self.realm.name
            )));
        }

        let index = self.anchor_index()?;

        let mut certs = Vec::with_capacity(chain.len());
        for der in chain {
            let (_, cert) = X509Certificate::from_der(der)
                .map_err(|e| DirectoryError::certificate(format!("malformed certificate: {e}")))?;
            certs.push(cert);
        }

        for cert in &certs {
            if !cert.validity().is_valid() {
                return Err(DirectoryError::certificate(format!(
                    "certificate {} is outside its validity window",
                    cert.subject()
                )));
            }
        }

        for pair in certs.windows(2) {
            let (child, issuer) = (&pair[0], &pair[1]);
            if child.issuer().as_raw() != issuer.subject().as_raw() {
                return Err(DirectoryError::certificate(format!(
                    "broken chain: {} is not issued by {}",
                    child.subject(),
                    issuer.subject()
                )));
            }
            child.verify_signature(Some(issuer.public_key())).map_err(|e| {
                DirectoryError::certificate(format!(
                    "signature of {} failed verification: {e}",
                    child.subject()
                ))
            })?;
        }

        self.check_anchored(index, chain, &certs)
    }

    /// Client certificate validation is not supported by this core.
    pub fn check_client_trusted(&self, _chain: &[&[u8]]) -> DirectoryResult<()> {
        Err(DirectoryError::Unsupported("client certificate validation"))
    }

    /// Accepted-issuer enumeration is not supported by this core.
    pub fn accepted_issuers(&self) -> DirectoryResult<Vec<Vec<u8>>> {
        Err(DirectoryError::Unsupported("accepted issuer enumeration"))
    }

    /// Checks that the terminal certificate is anchored in the realm,
    /// either by being an anchor itself or by being signed by one.
    fn check_anchored(
        &self,
        index: &AnchorIndex,
        chain: &[&[u8]],
        certs: &[X509Certificate<'_>],
    ) -> DirectoryResult<()> {
        // certs is non-empty; the caller checked the chain already.
        let Some(terminal) = certs.last() else {
            return Err(DirectoryError::certificate("empty certificate chain"));
        };
        let Some(terminal_der) = chain.last() else {
            return Err(DirectoryError::certificate("empty certificate chain"));
        };

        if index.entries.iter().any(|(der, _)| der == terminal_der) {
            return Ok(());
        }

        for (anchor_der, anchor_subject) in &index.entries {
            if anchor_subject.as_slice() != terminal.issuer().as_raw() {
                continue;
            }
            let (_, anchor) = X509Certificate::from_der(anchor_der).map_err(|e| {
                DirectoryError::certificate(format!("malformed trust anchor: {e}"))
            })?;
            if !anchor.validity().is_valid() {
                return Err(DirectoryError::certificate(format!(
                    "trust anchor {} is outside its validity window",
                    anchor.subject()
                )));
            }
            return terminal
                .verify_signature(Some(anchor.public_key()))
                .map_err(|e| {
                    DirectoryError::certificate(format!(
                        "signature of {} not verifiable by anchor {}: {e}",
                        terminal.subject(),
                        anchor.subject()
                    ))
                });
        }

        Err(DirectoryError::certificate(format!(
            "issuer {} is not trusted by realm {}",
            terminal.issuer(),
            self.realm.name
        )))
    }

    /// Builds the anchor lookup index on first use.
    fn anchor_index(&self) -> DirectoryResult<&AnchorIndex> {
        self.index.get_or_try_init(|| {
            let mut entries = Vec::with_capacity(self.realm.anchors_der.len());
            for der in &self.realm.anchors_der {
                let (_, cert) = X509Certificate::from_der(der).map_err(|e| {
                    DirectoryError::certificate(format!(
                        "malformed trust anchor in realm {}: {e}",
                        self.realm.name
                    ))
                })?;
                entries.push((der.clone(), cert.subject().as_raw().to_vec()));
            }
            Ok(AnchorIndex { entries })
        })
    }
}

// ============================================================================
// rustls adapter
// ============================================================================

/// Feeds rustls handshakes into the realm trust validator.
pub(crate) struct RealmCertVerifier {
    validator: Arc<RealmTrustValidator>,
}

impl ServerCertVerifier for RealmCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &rustls::Certificate,
        intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let mut chain: Vec<&[u8]> = Vec::with_capacity(intermediates.len() + 1);
        chain.push(end_entity.0.as_slice());
        chain.extend(intermediates.iter().map(|c| c.0.as_slice()));

        self.validator
            .check_server_trusted(&chain)
            .map_err(|e| rustls::Error::General(e.to_string()))?;

        Ok(ServerCertVerified::assertion())
    }
}

/// Builds a rustls client configuration that delegates trust decisions to
/// the realm validator.
pub(crate) fn client_tls_config(validator: Arc<RealmTrustValidator>) -> Arc<rustls::ClientConfig> {
    let config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(RealmCertVerifier { validator }))
        .with_no_client_auth();
    Arc::new(config)
}
