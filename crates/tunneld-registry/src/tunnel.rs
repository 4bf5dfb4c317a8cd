//! Tunnel value type and per-tunnel secret

use chrono::{DateTime, Utc};
use rand::RngCore;
use std::fmt;
use subtle::ConstantTimeEq;

use crate::relay::RelayHandle;

/// Per-tunnel deletion secret: 20 random bytes, hex-encoded.
///
/// Never exposed except to the tunnel's creator at creation time.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// The hex-encoded secret, for returning to the tunnel's creator
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a caller-supplied candidate.
    /// Length is the only thing observable through timing.
    pub fn verify(&self, candidate: &str) -> bool {
        bool::from(self.0.as_bytes().ct_eq(candidate.as_bytes()))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// One allocated tunnel: port pair, secret, creation time, and the owned
/// relay instance whose lifetime is bound to this value.
pub struct Tunnel {
    pub internet_port: u16,
    pub relay_port: u16,
    pub(crate) secret: Secret,
    pub created_at: DateTime<Utc>,
    pub ssl_enabled: bool,
    pub(crate) relay: Box<dyn RelayHandle>,
}

impl Tunnel {
    pub(crate) fn new(relay: Box<dyn RelayHandle>, secret: Secret, ssl_enabled: bool) -> Self {
        Self {
            internet_port: relay.internet_port(),
            relay_port: relay.relay_port(),
            secret,
            created_at: Utc::now(),
            ssl_enabled,
            relay,
        }
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }
}

impl fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tunnel")
            .field("internet_port", &self.internet_port)
            .field("relay_port", &self.relay_port)
            .field("created_at", &self.created_at)
            .field("ssl_enabled", &self.ssl_enabled)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a tunnel returned to its creator, including the one-time secret
#[derive(Debug, Clone)]
pub struct TunnelDescriptor {
    pub internet_port: u16,
    pub relay_port: u16,
    pub secret: String,
    pub created_at: DateTime<Utc>,
    pub ssl_enabled: bool,
}

impl From<&Tunnel> for TunnelDescriptor {
    fn from(tunnel: &Tunnel) -> Self {
        Self {
            internet_port: tunnel.internet_port,
            relay_port: tunnel.relay_port,
            secret: tunnel.secret.expose().to_string(),
            created_at: tunnel.created_at,
            ssl_enabled: tunnel.ssl_enabled,
        }
    }
}
