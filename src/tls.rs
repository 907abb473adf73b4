//! Client TLS material for the registry clients
//!
//! The CA, certificate and key are read once at construction, checked with
//! `rustls-pemfile`, then handed to both the PD HTTP client and the etcd
//! client so the two always authenticate the same way.

use crate::config::SecurityConfig;
use crate::error::{TopologyError, TopologyResult};
use rustls_pemfile::{certs, private_key};
use std::io::BufReader;
use tracing::debug;

/// PEM encoded client TLS material
#[derive(Clone)]
pub struct TlsMaterial {
    ca_pem: Vec<u8>,
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_pem", &format_args!("{} bytes", self.ca_pem.len()))
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

impl TlsMaterial {
    /// Load TLS material from the paths in `config`.
    ///
    /// Returns `Ok(None)` when TLS is not configured.
    pub fn load(config: &SecurityConfig) -> TopologyResult<Option<Self>> {
        if !config.is_tls_enabled() {
            if config.validate().is_err() {
                return Err(TopologyError::config(
                    "security ca_path, cert_path and key_path must be set together",
                ));
            }
            return Ok(None);
        }

        let (Some(ca_path), Some(cert_path), Some(key_path)) =
            (&config.ca_path, &config.cert_path, &config.key_path)
        else {
            return Ok(None);
        };

        debug!(ca_path = %ca_path, cert_path = %cert_path, key_path = %key_path, "Loading client TLS material");

        let ca_pem = read_pem_file(ca_path)?;
        let cert_pem = read_pem_file(cert_path)?;
        let key_pem = read_pem_file(key_path)?;

        Self::from_pem(ca_pem, cert_pem, key_pem).map(Some)
    }

    /// Build from in-memory PEM data, rejecting material without a
    /// certificate or private key
    pub fn from_pem(ca_pem: Vec<u8>, cert_pem: Vec<u8>, key_pem: Vec<u8>) -> TopologyResult<Self> {
        let ca_count = count_certificates(&ca_pem, "CA certificate")?;
        let cert_count = count_certificates(&cert_pem, "client certificate")?;

        let mut key_reader = BufReader::new(key_pem.as_slice());
        private_key(&mut key_reader)
            .map_err(|e| TopologyError::config(format!("Failed to parse private key: {}", e)))?
            .ok_or_else(|| TopologyError::config("No private key found in key file"))?;

        debug!(ca_count, cert_count, "Client TLS material validated");
        Ok(Self {
            ca_pem,
            cert_pem,
            key_pem,
        })
    }

    /// Apply the material to a PD HTTP client builder
    pub fn apply_to_http(
        &self,
        builder: reqwest::ClientBuilder,
    ) -> TopologyResult<reqwest::ClientBuilder> {
        let ca = reqwest::Certificate::from_pem(&self.ca_pem)
            .map_err(|e| TopologyError::tls(format!("Invalid CA certificate: {}", e)))?;

        let mut identity_pem = self.cert_pem.clone();
        identity_pem.push(b'\n');
        identity_pem.extend_from_slice(&self.key_pem);
        let identity = reqwest::Identity::from_pem(&identity_pem)
            .map_err(|e| TopologyError::tls(format!("Invalid client identity: {}", e)))?;

        Ok(builder
            .use_rustls_tls()
            .add_root_certificate(ca)
            .identity(identity))
    }

    /// TLS options for the etcd client
    pub fn etcd_tls_options(&self) -> etcd_client::TlsOptions {
        etcd_client::TlsOptions::new()
            .ca_certificate(etcd_client::Certificate::from_pem(&self.ca_pem))
            .identity(etcd_client::Identity::from_pem(&self.cert_pem, &self.key_pem))
    }
}

fn read_pem_file(path: &str) -> TopologyResult<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| TopologyError::config(format!("Failed to read TLS file {}: {}", path, e)))
}

fn count_certificates(pem: &[u8], what: &str) -> TopologyResult<usize> {
    let mut reader = BufReader::new(pem);
    let parsed = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TopologyError::config(format!("Failed to parse {}: {}", what, e)))?;

    if parsed.is_empty() {
        return Err(TopologyError::config(format!("No {} found", what)));
    }

    Ok(parsed.len())
}
