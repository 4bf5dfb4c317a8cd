//! Relay engine collaborator contract
//!
//! The registry never moves bytes itself; it constructs relay instances
//! through [`RelayEngine`] and ends them through the returned handle. The
//! engine is responsible for draining or dropping in-flight connections
//! when a tunnel is torn down.

use async_trait::async_trait;
use thiserror::Error;
use tunneld_cert::TlsMaterials;

/// The (public, relay-side) port pair of one tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    pub internet_port: u16,
    pub relay_port: u16,
}

/// Options for constructing a relay instance
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Per-tunnel secret, presented by relay-side clients
    pub secret: String,
    /// When set, the public listener terminates TLS with these materials
    pub internet_listener: Option<TlsMaterials>,
}

/// Relay construction errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind {which} port {port}: {source}")]
    Bind {
        which: &'static str,
        port: u16,
        source: std::io::Error,
    },

    #[error("TLS listener setup failed: {0}")]
    Tls(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Constructs live relay instances for allocated port pairs
#[async_trait]
pub trait RelayEngine: Send + Sync {
    async fn construct(
        &self,
        ports: PortPair,
        opts: RelayOptions,
    ) -> Result<Box<dyn RelayHandle>, RelayError>;
}

/// Handle to a live relay instance, exclusively owned by its tunnel.
///
/// `end` must be idempotent; the registry may call it from the expiration
/// sweep, an authorized delete, or full shutdown.
pub trait RelayHandle: Send + Sync {
    fn internet_port(&self) -> u16;
    fn relay_port(&self) -> u16;
    fn end(&self);
}
