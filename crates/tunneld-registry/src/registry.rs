//! Tunnel registry: lifecycle, expiration sweep, secret-based authorization
//!
//! The registry map lives behind an async mutex held across the whole
//! allocate -> construct -> insert sequence, so two concurrent creates can
//! never choose the same port: the exclusion set each allocation sees always
//! reflects every tunnel that has been or is being registered.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tunneld_cert::TlsMaterials;

use crate::allocator::{AllocatorError, PortAllocator};
use crate::relay::{PortPair, RelayEngine, RelayError, RelayOptions};
use crate::tunnel::{Secret, Tunnel, TunnelDescriptor};

/// Bounds and expiry policy for a registry instance
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub min_port: u16,
    pub max_port: u16,
    /// Fixed TTL from creation; there is no renewal or heartbeat.
    pub max_age_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            min_port: 1024,
            max_port: 65535,
            max_age_secs: 86400,
        }
    }
}

/// Per-tunnel creation options
#[derive(Debug, Clone, Default)]
pub struct TunnelOptions {
    pub ssl: bool,
    /// TLS materials for the public listener; required when `ssl` is set
    pub tls: Option<TlsMaterials>,
}

/// Tunnel creation errors. The API boundary collapses all of these into a
/// generic client-facing failure; the detail is for operator logs only.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("port allocation failed: {0}")]
    Allocation(#[from] AllocatorError),

    #[error("relay construction failed: {0}")]
    Relay(#[from] RelayError),
}

/// Owns all live tunnels, keyed by internet port
pub struct TunnelRegistry {
    tunnels: Mutex<HashMap<u16, Tunnel>>,
    allocator: PortAllocator,
    engine: Arc<dyn RelayEngine>,
    max_age_secs: u64,
    sweep: StdMutex<Option<JoinHandle<()>>>,
}

impl TunnelRegistry {
    pub fn new(settings: RegistrySettings, engine: Arc<dyn RelayEngine>) -> Self {
        info!(
            min_port = settings.min_port,
            max_port = settings.max_port,
            max_age_secs = settings.max_age_secs,
            "creating tunnel registry"
        );
        Self {
            tunnels: Mutex::new(HashMap::new()),
            allocator: PortAllocator::new(settings.min_port, settings.max_port),
            engine,
            max_age_secs: settings.max_age_secs,
            sweep: StdMutex::new(None),
        }
    }

    /// Expiry threshold in seconds, reported to creators as `expiresIn`
    pub fn max_age_secs(&self) -> u64 {
        self.max_age_secs
    }

    /// Allocate a port pair, provision a relay instance, and register the
    /// resulting tunnel. On any failure no partial entry is left behind.
    pub async fn new_tunnel(
        &self,
        desired_internet_port: u16,
        desired_relay_port: u16,
        opts: TunnelOptions,
    ) -> Result<TunnelDescriptor, RegistryError> {
        let mut tunnels = self.tunnels.lock().await;

        // Both halves of every registered pair are off limits.
        let mut exclude: HashSet<u16> = HashSet::with_capacity(tunnels.len() * 2);
        for tunnel in tunnels.values() {
            exclude.insert(tunnel.internet_port);
            exclude.insert(tunnel.relay_port);
        }

        let internet_port = self.allocator.allocate(desired_internet_port, &exclude)?;
        exclude.insert(internet_port);
        let relay_port = self.allocator.allocate(desired_relay_port, &exclude)?;

        let secret = Secret::generate();
        let relay_opts = RelayOptions {
            secret: secret.expose().to_string(),
            internet_listener: if opts.ssl { opts.tls } else { None },
        };

        // The probe above was advisory; the engine's bind can still lose a
        // race against another process. That surfaces here as a retryable
        // creation failure while the lock guarantees no other create has
        // claimed the pair in the meantime.
        let relay = self
            .engine
            .construct(
                PortPair {
                    internet_port,
                    relay_port,
                },
                relay_opts,
            )
            .await?;

        let tunnel = Tunnel::new(relay, secret, opts.ssl);
        let descriptor = TunnelDescriptor::from(&tunnel);
        tunnels.insert(internet_port, tunnel);

        info!(
            internet_port,
            relay_port,
            ssl = opts.ssl,
            total = tunnels.len(),
            "tunnel created"
        );
        Ok(descriptor)
    }

    /// Remove one tunnel, authorized by its secret.
    ///
    /// Returns `false` for both an unknown port and a secret mismatch, so an
    /// unauthorized caller cannot learn whether the tunnel exists.
    pub async fn remove(&self, internet_port: u16, secret: &str) -> bool {
        let mut tunnels = self.tunnels.lock().await;

        let authorized = tunnels
            .get(&internet_port)
            .map(|tunnel| tunnel.secret.verify(secret))
            .unwrap_or(false);
        if !authorized {
            debug!(internet_port, "delete refused: unknown port or secret mismatch");
            return false;
        }

        if let Some(tunnel) = tunnels.remove(&internet_port) {
            tunnel.relay.end();
            info!(internet_port, total = tunnels.len(), "tunnel removed");
        }
        true
    }

    /// Tear down every tunnel. Idempotent; used on full server shutdown.
    pub async fn remove_all(&self) {
        let mut tunnels = self.tunnels.lock().await;
        let count = tunnels.len();
        for (internet_port, tunnel) in tunnels.drain() {
            tunnel.relay.end();
            debug!(internet_port, "tunnel torn down");
        }
        if count > 0 {
            info!(count, "removed all tunnels");
        }
    }

    /// Remove every tunnel older than `max_age_secs`, in use or not.
    pub async fn remove_expired(&self, max_age_secs: u64) -> usize {
        self.remove_expired_at(Utc::now(), max_age_secs).await
    }

    /// Expiry pass against an explicit clock. Age must strictly exceed the
    /// threshold for a tunnel to be removed.
    pub async fn remove_expired_at(&self, now: DateTime<Utc>, max_age_secs: u64) -> usize {
        let mut tunnels = self.tunnels.lock().await;

        let expired: Vec<u16> = tunnels
            .values()
            .filter(|tunnel| tunnel.age_secs(now) > max_age_secs as i64)
            .map(|tunnel| tunnel.internet_port)
            .collect();

        for internet_port in &expired {
            if let Some(tunnel) = tunnels.remove(internet_port) {
                tunnel.relay.end();
                info!(
                    internet_port,
                    age_secs = tunnel.age_secs(now),
                    "expired tunnel removed"
                );
            }
        }
        expired.len()
    }

    /// Number of live tunnels
    pub async fn count(&self) -> usize {
        self.tunnels.lock().await.len()
    }

    /// Port pair and creation time of a live tunnel
    pub async fn status(&self, internet_port: u16) -> Option<(u16, u16, DateTime<Utc>)> {
        let tunnels = self.tunnels.lock().await;
        tunnels
            .get(&internet_port)
            .map(|t| (t.internet_port, t.relay_port, t.created_at))
    }

    /// Start the recurring expiration sweep as a task owned by this registry.
    /// Any previous sweep task is aborted first.
    pub fn start_sweep(self: Arc<Self>, interval: Duration) {
        let registry = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick completes immediately
            loop {
                ticker.tick().await;
                let removed = registry.remove_expired(registry.max_age_secs).await;
                if removed > 0 {
                    info!(removed, "expiration sweep finished");
                }
            }
        });

        if let Ok(mut sweep) = self.sweep.lock() {
            if let Some(old) = sweep.replace(handle) {
                warn!("replacing an already-running expiration sweep");
                old.abort();
            }
        }
    }

    /// Stop the sweep and tear down every tunnel. Idempotent.
    pub async fn shutdown(&self) {
        if let Ok(mut sweep) = self.sweep.lock() {
            if let Some(handle) = sweep.take() {
                handle.abort();
            }
        }
        self.remove_all().await;
    }
}

impl Drop for TunnelRegistry {
    fn drop(&mut self) {
        if let Ok(mut sweep) = self.sweep.lock() {
            if let Some(handle) = sweep.take() {
                handle.abort();
            }
        }
    }
}
