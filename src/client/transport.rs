//! HTTP transport construction
//!
//! Builds the shared `reqwest` client, optionally with a private CA and a
//! client certificate for mutual TLS.

use super::error::{Error, Result};
use reqwest::tls::{Certificate, Identity, Version};
use reqwest::Client;
use std::io;
use std::path::Path;

/// Default user agent sent with every request
pub const DEFAULT_USER_AGENT: &str = "bcc-rs";

/// TLS material and transport options.
///
/// Certificate fields accept either a path to a PEM file or inline PEM text.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub ca_cert: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    /// Skip server certificate verification
    pub insecure: bool,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ca_cert: None,
            client_cert: None,
            client_key: None,
            insecure: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl TransportConfig {
    pub fn with_ca_cert(mut self, ca_cert: impl Into<String>) -> Self {
        self.ca_cert = Some(ca_cert.into());
        self
    }

    pub fn with_client_cert(mut self, cert: impl Into<String>, key: impl Into<String>) -> Self {
        self.client_cert = Some(cert.into());
        self.client_key = Some(key.into());
        self
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Build the HTTP client. The result is meant to be shared by every call.
    pub fn build_client(&self) -> Result<Client> {
        let identity_sources = self.identity_sources()?;

        let mut builder = Client::builder()
            .user_agent(self.user_agent.as_str())
            .min_tls_version(Version::TLS_1_2)
            .danger_accept_invalid_certs(self.insecure);

        if let Some(ca) = non_empty(&self.ca_cert) {
            let pem = load_pem(ca)?;
            let certs = Certificate::from_pem_bundle(&pem).map_err(|source| Error::Certificate {
                name: "CA certificate".to_string(),
                source,
            })?;
            if certs.is_empty() {
                return Err(Error::Tls("CA bundle contains no certificates".to_string()));
            }
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let Some((cert, key)) = identity_sources {
            let mut pem = load_pem(cert)?;
            pem.push(b'\n');
            pem.extend(load_pem(key)?);
            let identity = Identity::from_pem(&pem).map_err(|source| Error::Certificate {
                name: "client certificate".to_string(),
                source,
            })?;
            builder = builder.identity(identity);
        }

        if self.insecure {
            tracing::warn!("TLS certificate verification disabled");
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to create HTTP client: {e}")))
    }

    /// Certificate and key to present, checked before anything is read
    fn identity_sources(&self) -> Result<Option<(&str, &str)>> {
        match (non_empty(&self.client_cert), non_empty(&self.client_key)) {
            (Some(cert), Some(key)) => {
                if non_empty(&self.ca_cert).is_none() {
                    return Err(Error::Tls(
                        "CA certificate is required when a client certificate is used".to_string(),
                    ));
                }
                Ok(Some((cert, key)))
            }
            (Some(_), None) => Err(Error::Tls(
                "client certificate cannot be applied without a key".to_string(),
            )),
            (None, Some(_)) => {
                tracing::warn!("Client key given without a certificate, ignoring it");
                Ok(None)
            }
            (None, None) => Ok(None),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Take inline PEM as-is, otherwise read the value as a file path
fn load_pem(source: &str) -> Result<Vec<u8>> {
    if source.contains("-----BEGIN") {
        return Ok(source.as_bytes().to_vec());
    }

    let path = Path::new(source);
    if !path.is_file() {
        return Err(Error::Io {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "neither a PEM file nor inline PEM data"),
        });
    }

    std::fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}
