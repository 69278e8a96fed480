//! Bounded directory connection pools.
//!
//! Two pools share one endpoint: the *lookup* pool holds connections
//! pre-bound as the service identity for user searches, and the *bind*
//! pool hands out unauthenticated connections that carry a single user
//! bind and are then discarded. Both are process-wide: created once at
//! provider initialization and torn down at shutdown, never per request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::DirectoryEndpoint;
use crate::error::{DirectoryError, DirectoryResult};
use crate::trust::{client_tls_config, RealmTrustValidator};

/// One bounded pool: a concurrency cap plus a list of idle connections.
struct PoolCore {
    /// Whether connections are pre-bound as the service identity.
    service_bound: bool,
    semaphore: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<Ldap>>>,
}

impl PoolCore {
    fn new(capacity: usize, service_bound: bool) -> Self {
        Self {
            service_bound,
            semaphore: Arc::new(Semaphore::new(capacity)),
            idle: Arc::new(Mutex::new(Vec::with_capacity(capacity))),
        }
    }
}

/// Owns the lookup and bind pools for one directory endpoint.
pub struct DirectoryConnectionPoolManager {
    endpoint: Arc<DirectoryEndpoint>,
    tls: Option<Arc<rustls::ClientConfig>>,
    lookup: PoolCore,
    bind: PoolCore,
    closed: Arc<AtomicBool>,
    probe_task: Mutex<Option<JoinHandle<()>>>,
}

impl DirectoryConnectionPoolManager {
    /// Creates the pools and starts the idle-connection probe task.
    ///
    /// Connections themselves are established lazily on first acquire.
    ///
    /// ## Errors
    ///
    /// Returns `DirectoryError::Configuration` if the endpoint is invalid,
    /// TLS is enabled without a trust validator, or the validator's realm
    /// does not match the endpoint's.
    pub fn initialize(
        endpoint: DirectoryEndpoint,
        trust: Option<Arc<RealmTrustValidator>>,
    ) -> DirectoryResult<Self> {
        endpoint.validate()?;

        let tls = if endpoint.tls_enabled {
            let validator = trust.ok_or_else(|| {
                DirectoryError::configuration("TLS is enabled but no trust validator was supplied")
            })?;
            if Some(validator.realm_name()) != endpoint.trust_realm.as_deref() {
                return Err(DirectoryError::configuration(format!(
                    "trust validator realm {} does not match endpoint realm {}",
                    validator.realm_name(),
                    endpoint.trust_realm.as_deref().unwrap_or("<none>")
                )));
            }
            Some(client_tls_config(validator))
        } else {
            None
        };

        let endpoint = Arc::new(endpoint);
        let lookup = PoolCore::new(endpoint.pool_size, true);
        let bind = PoolCore::new(endpoint.pool_size, false);

        let probe = spawn_probe_task(
            Arc::clone(&endpoint),
            vec![Arc::clone(&lookup.idle), Arc::clone(&bind.idle)],
        );

        Ok(Self {
            endpoint,
            tls,
            lookup,
            bind,
            closed: Arc::new(AtomicBool::new(false)),
            probe_task: Mutex::new(Some(probe)),
        })
    }

    /// Returns the endpoint these pools serve.
    #[must_use]
    pub fn endpoint(&self) -> &DirectoryEndpoint {
        &self.endpoint
    }

    /// Acquires a service-bound connection for user lookups.
    ///
    /// Blocks while the pool is exhausted, up to the configured acquire
    /// timeout; the returned handle goes back to the pool when dropped.
    pub async fn acquire_lookup(&self) -> DirectoryResult<PooledConnection> {
        self.acquire(&self.lookup).await
    }

    /// Acquires an unauthenticated connection for a user bind.
    ///
    /// The caller is expected to [`discard`](PooledConnection::discard) the
    /// handle after the bind attempt; a user-bound connection must never be
    /// returned to the pool.
    pub async fn acquire_bind(&self) -> DirectoryResult<PooledConnection> {
        self.acquire(&self.bind).await
    }

    /// Stops the probe task and unbinds every idle connection.
    ///
    /// Connections still checked out are closed on return instead of
    /// rejoining the pool.
    pub async fn shutdown(&self) {
        // Flagged before draining so a handle returned mid-shutdown cannot
        // slip back into an already-drained idle list.
        self.closed.store(true, Ordering::Release);
        if let Some(task) = self.probe_task.lock().take() {
            task.abort();
        }
        self.lookup.semaphore.close();
        self.bind.semaphore.close();

        for idle in [&self.lookup.idle, &self.bind.idle] {
            let conns: Vec<Ldap> = std::mem::take(&mut *idle.lock());
            for mut ldap in conns {
                let _ = ldap.unbind().await;
            }
        }
    }

    async fn acquire(&self, pool: &PoolCore) -> DirectoryResult<PooledConnection> {
        let permit = tokio::time::timeout(
            self.endpoint.acquire_timeout,
            Arc::clone(&pool.semaphore).acquire_owned(),
        )
        .await
        .map_err(|_| {
            DirectoryError::unavailable("timed out waiting for a pooled directory connection")
        })?
        .map_err(|_| DirectoryError::unavailable("connection pool is shut down"))?;

        let reused = pool.idle.lock().pop();
        let ldap = match reused {
            Some(ldap) => ldap,
            None => self.connect(pool.service_bound).await?,
        };

        Ok(PooledConnection {
            ldap,
            idle: Arc::clone(&pool.idle),
            closed: Arc::clone(&self.closed),
            discarded: false,
            _permit: permit,
        })
    }

    #[cfg(test)]
    pub(crate) fn idle_counts(&self) -> (usize, usize) {
        (self.lookup.idle.lock().len(), self.bind.idle.lock().len())
    }

    /// Establishes a new connection, negotiating TLS when configured and
    /// binding as the service identity for the lookup pool.
    async fn connect(&self, service_bound: bool) -> DirectoryResult<Ldap> {
        let mut settings = LdapConnSettings::new().set_conn_timeout(self.endpoint.connect_timeout);
        if let Some(config) = &self.tls {
            settings = settings.set_config(Arc::clone(config));
        }

        let url = self.endpoint.url();
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| self.classify_connect_error(&e))?;
        ldap3::drive!(conn);

        if service_bound {
            let result = ldap
                .with_timeout(self.endpoint.operation_timeout)
                .simple_bind(&self.endpoint.bind_dn, &self.endpoint.bind_credential)
                .await
                .map_err(|e| self.classify_connect_error(&e))?;
            if result.rc != 0 {
                let _ = ldap.unbind().await;
                return Err(DirectoryError::configuration(format!(
                    "service bind as {} rejected with result code {}",
                    self.endpoint.bind_dn, result.rc
                )));
            }
            tracing::debug!(bind_dn = %self.endpoint.bind_dn, "opened service-bound directory connection");
        } else {
            tracing::debug!(url = %url, "opened anonymous directory connection");
        }

        Ok(ldap)
    }

    /// Distinguishes trust failures from plain connectivity failures.
    ///
    /// rustls surfaces our verifier's rejection through the connect error
    /// text, so a failed handshake on a TLS endpoint is reported as a
    /// certificate problem rather than an outage.
    fn classify_connect_error(&self, err: &ldap3::LdapError) -> DirectoryError {
        let msg = err.to_string();
        if self.tls.is_some() && msg.to_ascii_lowercase().contains("certificate") {
            DirectoryError::certificate(msg)
        } else {
            DirectoryError::unavailable(msg)
        }
    }
}

impl std::fmt::Debug for DirectoryConnectionPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryConnectionPoolManager")
            .field("endpoint", &self.endpoint.url())
            .field("pool_size", &self.endpoint.pool_size)
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

/// Periodically probes idle connections and silently drops dead ones.
///
/// Replacement is lazy: the next acquire that finds the idle list empty
/// opens a fresh connection, so probe failures are never visible to
/// callers.
fn spawn_probe_task(
    endpoint: Arc<DirectoryEndpoint>,
    idle_lists: Vec<Arc<Mutex<Vec<Ldap>>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(endpoint.probe_period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            for idle in &idle_lists {
                let conns: Vec<Ldap> = std::mem::take(&mut *idle.lock());
                for mut ldap in conns {
                    match probe(&mut ldap, endpoint.operation_timeout).await {
                        Ok(()) => {
                            // Fresh connections may have filled the list
                            // while this one was held out for probing.
                            if let Some(mut surplus) =
                                repool_within_cap(idle, endpoint.pool_size, ldap)
                            {
                                let _ = surplus.unbind().await;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "dropping dead idle directory connection");
                            let _ = ldap.unbind().await;
                        }
                    }
                }
            }
        }
    })
}

/// Returns a probed connection to the idle list unless the list is already
/// at pool capacity; the caller closes the surplus connection.
fn repool_within_cap<C>(idle: &Mutex<Vec<C>>, capacity: usize, conn: C) -> Option<C> {
    let mut guard = idle.lock();
    if guard.len() < capacity {
        guard.push(conn);
        None
    } else {
        Some(conn)
    }
}

/// Root-DSE base search; cheap and allowed without authentication.
async fn probe(ldap: &mut Ldap, deadline: Duration) -> Result<(), ldap3::LdapError> {
    ldap.with_timeout(deadline)
        .search("", Scope::Base, "(objectClass=*)", vec!["supportedLDAPVersion"])
        .await?
        .success()?;
    Ok(())
}

// ============================================================================
// Pooled Connection
// ============================================================================

/// A checked-out directory connection.
///
/// Dropping the handle returns the connection to its pool on every exit
/// path of the caller; [`discard`](Self::discard) closes it instead when
/// its state is no longer pool-safe.
#[derive(Debug)]
pub struct PooledConnection {
    ldap: Ldap,
    idle: Arc<Mutex<Vec<Ldap>>>,
    closed: Arc<AtomicBool>,
    discarded: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Returns a mutable handle for issuing operations.
    pub fn ldap_mut(&mut self) -> &mut Ldap {
        &mut self.ldap
    }

    /// Unbinds and closes the connection instead of pooling it.
    ///
    /// Used after a user bind (the connection is no longer the service
    /// identity) and after timeouts, where the connection state is unknown.
    pub async fn discard(mut self) {
        self.discarded = true;
        let _ = self.ldap.unbind().await;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // A return after shutdown is dropped; the idle list was already
        // drained and nothing will unbind a late arrival.
        if !self.discarded && !self.closed.load(Ordering::Acquire) {
            // Ldap handles are cheap clones over one driven connection.
            self.idle.lock().push(self.ldap.clone());
        }
    }
}
