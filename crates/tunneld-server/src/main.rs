//! Tunnel control-plane server
//!
//! Wires the tunnel registry, the default TCP relay engine, the certificate
//! provider, and the HTTP control API into one process. Configuration comes
//! from flags or the environment variables the deployment scripts set
//! (SERVER_PORT, SERVER_DOMAIN, SERVER_TOKEN, SSL_*).

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tunneld_api::{ApiServer, ApiServerConfig, DEFAULT_SERVER_TOKEN};
use tunneld_cert::CertificateProvider;
use tunneld_registry::{RegistrySettings, TunnelRegistry};
use tunneld_relay::TcpRelayEngine;

/// Reverse tunnel control plane
#[derive(Parser, Debug)]
#[command(name = "tunneld")]
#[command(about = "Allocate and manage reverse tunnels over a control API", long_about = None)]
#[command(version)]
struct Cli {
    /// Control API port
    #[arg(long, env = "SERVER_PORT", default_value = "3000")]
    server_port: u16,

    /// Public domain used in returned tunnel URIs
    #[arg(long, env = "SERVER_DOMAIN", default_value = "127.0.0.1")]
    server_domain: String,

    /// Shared token required on mutating endpoints
    #[arg(long, env = "SERVER_TOKEN", default_value = DEFAULT_SERVER_TOKEN)]
    server_token: String,

    /// Serve the control API over TLS as well, using ACME-backed materials
    #[arg(long, env = "SSL_ENABLED")]
    ssl_enabled: bool,

    /// TLS control API port
    #[arg(long, env = "SSL_PORT", default_value = "443")]
    ssl_port: u16,

    /// Log resolved certificate paths at startup
    #[arg(long, env = "SSL_DEBUG")]
    ssl_debug: bool,

    /// Contact email registered with the ACME provider (informational; the
    /// provider refreshes materials out of band)
    #[arg(long, env = "SSL_EMAIL")]
    ssl_email: Option<String>,

    /// ACME configuration directory
    #[arg(long, env = "SSL_DIR")]
    ssl_dir: Option<PathBuf>,

    /// Use the production ACME directory instead of staging
    #[arg(long, env = "SSL_PRODUCTION")]
    ssl_production: bool,

    /// Directory with the self-signed fallback materials
    #[arg(long, env = "SSL_SELF_SIGNED_DIR", default_value = "./self-signed-certs")]
    self_signed_dir: PathBuf,

    /// Lowest allocatable tunnel port
    #[arg(long, default_value = "1024")]
    min_port: u16,

    /// Highest allocatable tunnel port
    #[arg(long, default_value = "65535")]
    max_port: u16,

    /// Tunnel TTL in seconds; older tunnels are removed by the sweep
    #[arg(long, default_value = "86400")]
    max_age_secs: u64,

    /// Expiration sweep interval in seconds
    #[arg(long, default_value = "900")]
    sweep_interval_secs: u64,

    /// Landing page for GET /
    #[arg(long, default_value = "https://github.com/tunneld/tunneld")]
    landing_page: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable permissive CORS on the control API
    #[arg(long)]
    enable_cors: bool,
}

fn default_acme_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("acme")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    if cli.server_token == DEFAULT_SERVER_TOKEN {
        warn!("running with the default server token; change it for security reasons");
    }

    let cert_provider = if cli.ssl_enabled {
        let dir = cli.ssl_dir.clone().unwrap_or_else(default_acme_dir);
        if let Some(email) = &cli.ssl_email {
            info!(email = %email, "ACME contact email configured");
        }
        let provider =
            CertificateProvider::acme(dir, cli.server_domain.clone(), cli.ssl_production);
        info!(directory = provider.directory_url(), "using ACME-backed certificates");
        provider
    } else {
        CertificateProvider::self_signed(cli.self_signed_dir.clone())
    };

    if cli.ssl_debug {
        match cert_provider.resolve() {
            Ok(materials) => info!(
                key = %materials.key.display(),
                cert = %materials.cert.display(),
                ca = %materials.ca.display(),
                "TLS materials resolved"
            ),
            Err(e) => warn!(error = %e, "TLS materials not yet available"),
        }
    }

    let registry = Arc::new(TunnelRegistry::new(
        RegistrySettings {
            min_port: cli.min_port,
            max_port: cli.max_port,
            max_age_secs: cli.max_age_secs,
        },
        Arc::new(TcpRelayEngine::new()),
    ));
    registry
        .clone()
        .start_sweep(Duration::from_secs(cli.sweep_interval_secs));

    let bind_addr: SocketAddr = ([0, 0, 0, 0], cli.server_port).into();
    let api = ApiServer::new(
        ApiServerConfig {
            bind_addr,
            domain: cli.server_domain.clone(),
            server_token: cli.server_token.clone(),
            landing_page: cli.landing_page.clone(),
            enable_cors: cli.enable_cors,
        },
        registry.clone(),
        cert_provider.clone(),
    );

    let server = async {
        if cli.ssl_enabled {
            let materials = cert_provider
                .resolve()
                .context("SSL enabled but TLS materials are unavailable")?;
            let tls_addr: SocketAddr = ([0, 0, 0, 0], cli.ssl_port).into();
            api.start_with_tls(tls_addr, &materials).await
        } else {
            api.start().await
        }
    };

    tokio::select! {
        result = server => result?,
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    // Stop the sweep and tear every tunnel down before exiting.
    registry.shutdown().await;
    info!("shutdown complete");

    Ok(())
}
