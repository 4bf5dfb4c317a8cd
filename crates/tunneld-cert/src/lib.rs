//! TLS certificate material lookup
//!
//! Resolves key/cert/ca file locations for tunnels that request TLS. Two
//! modes: a self-signed fallback directory with fixed file names, and an
//! ACME-backed layout whose files are refreshed out of band by the ACME
//! client. This crate never performs ACME protocol steps itself; it only
//! resolves paths and verifies the materials are present on disk.

use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Let's Encrypt staging directory (certificates not trusted by browsers)
pub const ACME_STAGING_DIRECTORY: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Let's Encrypt production directory
pub const ACME_PRODUCTION_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Resolved TLS material file paths, handed to the relay engine
#[derive(Debug, Clone)]
pub struct TlsMaterials {
    pub key: PathBuf,
    pub cert: PathBuf,
    pub ca: PathBuf,
}

/// Certificate lookup errors
#[derive(Debug, Error)]
pub enum CertError {
    #[error("certificate material missing: {0}")]
    MissingMaterial(PathBuf),
}

/// Source of TLS materials for tunnels requesting SSL
#[derive(Debug, Clone)]
pub enum CertificateProvider {
    /// Fixed bundled materials, used when no ACME-backed service is configured
    SelfSigned { dir: PathBuf },
    /// ACME-obtained materials under `{config_dir}/live/{domain}/`
    Acme {
        config_dir: PathBuf,
        domain: String,
        production: bool,
    },
}

impl CertificateProvider {
    pub fn self_signed(dir: impl Into<PathBuf>) -> Self {
        Self::SelfSigned { dir: dir.into() }
    }

    pub fn acme(config_dir: impl Into<PathBuf>, domain: impl Into<String>, production: bool) -> Self {
        Self::Acme {
            config_dir: config_dir.into(),
            domain: domain.into(),
            production,
        }
    }

    pub fn is_self_signed(&self) -> bool {
        matches!(self, Self::SelfSigned { .. })
    }

    /// The ACME directory URL class this provider's materials come from.
    /// Informational only; certificate refresh happens out of band.
    pub fn directory_url(&self) -> &'static str {
        match self {
            Self::Acme { production: true, .. } => ACME_PRODUCTION_DIRECTORY,
            _ => ACME_STAGING_DIRECTORY,
        }
    }

    /// Resolve concrete key/cert/ca paths.
    ///
    /// The key and cert must exist on disk; the ca path is resolved but not
    /// required (the self-signed bundle carries one, ACME uses the fullchain).
    pub fn resolve(&self) -> Result<TlsMaterials, CertError> {
        let materials = match self {
            Self::SelfSigned { dir } => TlsMaterials {
                key: dir.join("server-key.pem"),
                cert: dir.join("server-crt.pem"),
                ca: dir.join("ca-crt.pem"),
            },
            Self::Acme {
                config_dir, domain, ..
            } => {
                let live = config_dir.join("live").join(domain);
                TlsMaterials {
                    key: live.join("privkey.pem"),
                    cert: live.join("cert.pem"),
                    ca: live.join("fullchain.pem"),
                }
            }
        };

        for path in [&materials.key, &materials.cert] {
            if !path.exists() {
                return Err(CertError::MissingMaterial(path.clone()));
            }
        }

        debug!(key = %materials.key.display(), cert = %materials.cert.display(), "resolved TLS materials");
        Ok(materials)
    }
}
