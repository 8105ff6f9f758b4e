// SPDX-License-Identifier: MIT

//! A named TLS context: certificate/key/trust-anchor file paths, and the
//! loaders that turn them into `rustls` configs (SPEC_FULL.md §6 `[[tls]]`).

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig as RustlsClientConfig, RootCertStore, ServerConfig as RustlsServerConfig};

use crate::error::TlsError;

use super::TlsConfig;

#[derive(Debug, Clone)]
pub struct TlsContextConfig {
    pub name: String,
    pub ca_certificate_file: Option<String>,
    pub ca_certificate_path: Option<String>,
    pub certificate_file: Option<String>,
    pub certificate_key_file: Option<String>,
    pub certificate_key_password: Option<String>,
}

impl From<TlsConfig> for TlsContextConfig {
    fn from(t: TlsConfig) -> Self {
        TlsContextConfig {
            name: t.name,
            ca_certificate_file: t.ca_certificate_file,
            ca_certificate_path: t.ca_certificate_path,
            certificate_file: t.certificate_file,
            certificate_key_file: t.certificate_key_file,
            certificate_key_password: t.certificate_key_password,
        }
    }
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::Io)
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| TlsError::CertParse(format!("no private key in {path}")))
}

fn load_root_store(ca_file: Option<&str>, ca_path: Option<&str>) -> Result<RootCertStore, TlsError> {
    let mut store = RootCertStore::empty();
    if let Some(file) = ca_file {
        for cert in load_certs(file)? {
            store.add(cert).map_err(TlsError::Rustls)?;
        }
    }
    if let Some(dir) = ca_path {
        for entry in std::fs::read_dir(dir)?.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "pem" || e == "crt") {
                for cert in load_certs(&path.to_string_lossy())? {
                    store.add(cert).map_err(TlsError::Rustls)?;
                }
            }
        }
    }
    Ok(store)
}

impl TlsContextConfig {
    /// Build a server-side TLS config presenting this context's certificate
    /// chain and requiring a client certificate signed by its trust anchors.
    pub fn build_server_config(&self) -> Result<Arc<RustlsServerConfig>, TlsError> {
        let cert_file = self
            .certificate_file
            .as_deref()
            .ok_or_else(|| TlsError::CertParse(format!("tls context {:?} has no certificate_file", self.name)))?;
        let key_file = self
            .certificate_key_file
            .as_deref()
            .ok_or_else(|| TlsError::CertParse(format!("tls context {:?} has no certificate_key_file", self.name)))?;
        let chain = load_certs(cert_file)?;
        let key = load_private_key(key_file)?;
        let roots = load_root_store(self.ca_certificate_file.as_deref(), self.ca_certificate_path.as_deref())?;

        let client_verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| TlsError::CertParse(e.to_string()))?;

        let config = RustlsServerConfig::builder()
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(chain, key)?;
        Ok(Arc::new(config))
    }

    /// Build a client-side TLS config presenting this context's certificate
    /// to upstream RadSec servers and validating them against its trust
    /// anchors.
    pub fn build_client_config(&self) -> Result<Arc<RustlsClientConfig>, TlsError> {
        let roots = load_root_store(self.ca_certificate_file.as_deref(), self.ca_certificate_path.as_deref())?;
        let builder = RustlsClientConfig::builder().with_root_certificates(roots);

        let config = match (&self.certificate_file, &self.certificate_key_file) {
            (Some(cert_file), Some(key_file)) => {
                let chain = load_certs(cert_file)?;
                let key = load_private_key(key_file)?;
                builder.with_client_auth_cert(chain, key)?
            }
            _ => builder.with_no_client_auth(),
        };
        Ok(Arc::new(config))
    }
}
