//! Default TCP relay engine
//!
//! Implements the registry's [`RelayEngine`] contract: binds the public and
//! relay-side listeners for an allocated port pair, pairs each public
//! connection with one authenticated relay-side connection, and pipes bytes
//! between them. Relay-side clients authenticate by sending the tunnel
//! secret followed by a newline as their first bytes. When the tunnel
//! requests TLS, the public listener terminates it with the resolved
//! certificate materials.
//!
//! Both listeners are bound up front so a lost bind race surfaces to the
//! registry as a creation failure instead of a half-started relay.

use std::io::{self, Cursor};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use subtle::ConstantTimeEq;
use tokio::io::{copy_bidirectional, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

use tunneld_cert::TlsMaterials;
use tunneld_registry::{PortPair, RelayEngine, RelayError, RelayHandle, RelayOptions};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Relay engine backed by plain TCP listeners
#[derive(Debug, Clone, Default)]
pub struct TcpRelayEngine;

impl TcpRelayEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RelayEngine for TcpRelayEngine {
    async fn construct(
        &self,
        ports: PortPair,
        opts: RelayOptions,
    ) -> Result<Box<dyn RelayHandle>, RelayError> {
        let internet = TcpListener::bind(("0.0.0.0", ports.internet_port))
            .await
            .map_err(|source| RelayError::Bind {
                which: "internet",
                port: ports.internet_port,
                source,
            })?;
        let relay = TcpListener::bind(("0.0.0.0", ports.relay_port))
            .await
            .map_err(|source| RelayError::Bind {
                which: "relay",
                port: ports.relay_port,
                source,
            })?;

        let acceptor = match &opts.internet_listener {
            Some(materials) => Some(load_tls_acceptor(materials).await?),
            None => None,
        };

        let (tx, rx) = mpsc::channel::<TcpStream>(16);
        let secret: Arc<str> = opts.secret.into();

        let relay_task = tokio::spawn(accept_relay_connections(relay, tx, secret));
        let internet_task = tokio::spawn(accept_public_connections(internet, rx, acceptor));

        debug!(
            internet_port = ports.internet_port,
            relay_port = ports.relay_port,
            "relay instance started"
        );
        Ok(Box::new(TcpRelayHandle {
            ports,
            relay_task,
            internet_task,
        }))
    }
}

struct TcpRelayHandle {
    ports: PortPair,
    relay_task: JoinHandle<()>,
    internet_task: JoinHandle<()>,
}

impl RelayHandle for TcpRelayHandle {
    fn internet_port(&self) -> u16 {
        self.ports.internet_port
    }

    fn relay_port(&self) -> u16 {
        self.ports.relay_port
    }

    fn end(&self) {
        // Aborting drops the listeners and frees both ports. Connections
        // already paired keep draining until either side closes.
        self.relay_task.abort();
        self.internet_task.abort();
        debug!(
            internet_port = self.ports.internet_port,
            relay_port = self.ports.relay_port,
            "relay instance ended"
        );
    }
}

impl Drop for TcpRelayHandle {
    fn drop(&mut self) {
        self.relay_task.abort();
        self.internet_task.abort();
    }
}

async fn load_tls_acceptor(materials: &TlsMaterials) -> Result<TlsAcceptor, RelayError> {
    let cert_pem = tokio::fs::read(&materials.cert)
        .await
        .map_err(|e| RelayError::Tls(format!("read {}: {e}", materials.cert.display())))?;
    let key_pem = tokio::fs::read(&materials.key)
        .await
        .map_err(|e| RelayError::Tls(format!("read {}: {e}", materials.key.display())))?;

    let certs = rustls_pemfile::certs(&mut Cursor::new(cert_pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RelayError::Tls(format!("parse certificate chain: {e}")))?;
    let key = rustls_pemfile::private_key(&mut Cursor::new(key_pem))
        .map_err(|e| RelayError::Tls(format!("parse private key: {e}")))?
        .ok_or_else(|| RelayError::Tls("no private key found".to_string()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| RelayError::Tls(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Accept relay-side connections, authenticate them, and queue them for
/// pairing. Unauthenticated connections are dropped.
async fn accept_relay_connections(
    listener: TcpListener,
    tx: mpsc::Sender<TcpStream>,
    secret: Arc<str>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "relay-side accept failed");
                continue;
            }
        };

        let tx = tx.clone();
        let secret = secret.clone();
        tokio::spawn(async move {
            let mut stream = stream;
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_handshake(&mut stream, secret.len()))
                .await
            {
                Ok(Ok(presented))
                    if bool::from(presented.as_bytes().ct_eq(secret.as_bytes())) =>
                {
                    debug!(%peer, "relay connection authenticated");
                    let _ = tx.send(stream).await;
                }
                Ok(Ok(_)) => warn!(%peer, "relay handshake rejected"),
                Ok(Err(e)) => warn!(%peer, error = %e, "relay handshake failed"),
                Err(_) => warn!(%peer, "relay handshake timed out"),
            }
        });
    }
}

async fn read_handshake(stream: &mut TcpStream, secret_len: usize) -> io::Result<String> {
    let mut buf = vec![0u8; secret_len + 1];
    stream.read_exact(&mut buf).await?;
    if buf.pop() != Some(b'\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing handshake terminator",
        ));
    }
    String::from_utf8(buf)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "handshake is not utf-8"))
}

/// Accept public connections and pair each with the next authenticated
/// relay-side connection.
async fn accept_public_connections(
    listener: TcpListener,
    mut rx: mpsc::Receiver<TcpStream>,
    acceptor: Option<TlsAcceptor>,
) {
    loop {
        let (public, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "public accept failed");
                continue;
            }
        };
        debug!(%peer, "public connection accepted");

        let Some(upstream) = rx.recv().await else {
            return;
        };
        tokio::spawn(pipe(public, upstream, acceptor.clone()));
    }
}

async fn pipe(public: TcpStream, mut upstream: TcpStream, acceptor: Option<TlsAcceptor>) {
    match acceptor {
        Some(acceptor) => match acceptor.accept(public).await {
            Ok(mut tls) => {
                if let Err(e) = copy_bidirectional(&mut tls, &mut upstream).await {
                    debug!(error = %e, "relay pipe closed");
                }
            }
            Err(e) => warn!(error = %e, "TLS accept on public listener failed"),
        },
        None => {
            let mut public = public;
            if let Err(e) = copy_bidirectional(&mut public, &mut upstream).await {
                debug!(error = %e, "relay pipe closed");
            }
        }
    }
}
