use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Client TLS configuration shared by the PD HTTP client and the etcd client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Path to the CA certificate (PEM)
    pub ca_path: Option<String>,
    /// Path to the client certificate (PEM)
    pub cert_path: Option<String>,
    /// Path to the client private key (PEM)
    pub key_path: Option<String>,
}

impl SecurityConfig {
    /// TLS is on only when the CA, certificate and key are all given
    pub fn is_tls_enabled(&self) -> bool {
        [&self.ca_path, &self.cert_path, &self.key_path]
            .iter()
            .all(|p| p.as_deref().is_some_and(|s| !s.is_empty()))
    }

    /// Validate security configuration
    pub fn validate(&self) -> Result<()> {
        let set = [&self.ca_path, &self.cert_path, &self.key_path]
            .iter()
            .filter(|p| p.as_deref().is_some_and(|s| !s.is_empty()))
            .count();

        if set != 0 && set != 3 {
            return Err(anyhow::anyhow!(
                "security ca_path, cert_path and key_path must be set together"
            ));
        }

        Ok(())
    }

    /// `https` when TLS is configured, `http` otherwise
    pub fn http_scheme(&self) -> &'static str {
        if self.is_tls_enabled() {
            "https"
        } else {
            "http"
        }
    }
}
