//! TLS keypairs for the HTTPS dev server.
//!
//! Issuing and trusting certificates happens outside plugdev; the server only
//! asks a [`CertificateProvider`] for PEM material covering its domains.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::TlsSection;
use crate::error::{CliError, Result};

/// PEM-encoded certificate chain and private key.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsKeypair {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl std::fmt::Debug for TlsKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsKeypair")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

pub trait CertificateProvider: Send + Sync {
    /// A keypair valid for `domains`, or `None` when HTTPS is not available.
    fn certificate_for(&self, domains: &[String]) -> Result<Option<TlsKeypair>>;
}

/// Reads an existing certificate and key from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PemFileProvider {
    cert: PathBuf,
    key: PathBuf,
}

impl PemFileProvider {
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
        }
    }

    /// Provider for the `[tls]` section: explicit `cert`/`key` win over
    /// `dir/cert.pem` and `dir/key.pem`. `None` when nothing is configured.
    pub fn from_section(section: &TlsSection) -> Option<Self> {
        match (&section.cert, &section.key, &section.dir) {
            (Some(cert), Some(key), _) => Some(Self::new(cert, key)),
            (_, _, Some(dir)) => Some(Self::new(dir.join("cert.pem"), dir.join("key.pem"))),
            _ => None,
        }
    }
}

impl CertificateProvider for PemFileProvider {
    fn certificate_for(&self, domains: &[String]) -> Result<Option<TlsKeypair>> {
        let cert_pem = match read_pem(&self.cert)? {
            Some(pem) => pem,
            None => return Ok(None),
        };
        let key_pem = match read_pem(&self.key)? {
            Some(pem) => pem,
            None => return Ok(None),
        };
        tracing::debug!(
            cert = %self.cert.display(),
            domains = %domains.join(","),
            "Loaded TLS certificate"
        );
        Ok(Some(TlsKeypair { cert_pem, key_pem }))
    }
}

/// `None` when the file is missing; an error when it exists but is unusable.
fn read_pem(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) if looks_like_pem(&bytes) => Ok(Some(bytes)),
        Ok(_) => Err(CliError::Certificate(format!(
            "{} is not a PEM file",
            path.display()
        ))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(CliError::Certificate(format!(
            "Failed to read {}: {err}",
            path.display()
        ))),
    }
}

fn looks_like_pem(bytes: &[u8]) -> bool {
    String::from_utf8_lossy(bytes).contains("-----BEGIN ")
}
