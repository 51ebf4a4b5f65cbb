//! TLS acceptor construction from PEM files.

use crate::config::TlsConfig;
use crate::error::ServerError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Builds a TLS acceptor, with client certificate verification when
/// `require_client_cert` is set.
pub fn create_tls_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, ServerError> {
    let cert_path = config
        .cert_path
        .as_ref()
        .ok_or_else(|| ServerError::TlsConfig("cert_path not set".into()))?;
    let key_path = config
        .key_path
        .as_ref()
        .ok_or_else(|| ServerError::TlsConfig("key_path not set".into()))?;

    let client_ca_path = match (config.require_client_cert, &config.client_ca_path) {
        (true, None) => {
            return Err(ServerError::TlsConfig(
                "client_ca_path not set for mTLS".into(),
            ))
        }
        (true, Some(path)) => Some(path),
        (false, _) => None,
    };

    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let server_config = match client_ca_path {
        Some(ca_path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_path)? {
                roots.add(cert).map_err(|e| {
                    ServerError::TlsConfig(format!("invalid client CA cert: {}", e))
                })?;
            }

            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|e| {
                    ServerError::TlsConfig(format!("failed to build client verifier: {}", e))
                })?;

            rustls::ServerConfig::builder()
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
        }
        None => rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key),
    }
    .map_err(|e| ServerError::TlsConfig(format!("invalid server cert/key: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let file = File::open(path)
        .map_err(|e| ServerError::TlsConfig(format!("cannot open cert file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::TlsConfig(format!("invalid cert file {:?}: {}", path, e)))?;
    if certs.is_empty() {
        return Err(ServerError::TlsConfig(format!(
            "no certificates found in {:?}",
            path
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerError> {
    let file = File::open(path)
        .map_err(|e| ServerError::TlsConfig(format!("cannot open key file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ServerError::TlsConfig(format!("invalid key file {:?}: {}", path, e)))?
        .ok_or_else(|| ServerError::TlsConfig(format!("no private key found in {:?}", path)))
}
