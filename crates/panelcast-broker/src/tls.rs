//! TLS acceptor construction from PEM files.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use panelcast_config::TlsConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use crate::error::BrokerError;

/// Build an acceptor from the configured certificate material.
///
/// Returns `Ok(None)` when TLS is not configured or either file is missing,
/// in which case the broker serves plaintext. Material that exists but does
/// not parse is an error.
pub fn load_acceptor(config: &TlsConfig) -> Result<Option<TlsAcceptor>, BrokerError> {
    let (Some(cert_path), Some(key_path)) = (&config.cert_path, &config.key_path) else {
        return Ok(None);
    };

    for path in [cert_path, key_path] {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "TLS material missing, serving plaintext");
            return Ok(None);
        }
    }

    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let server_config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| BrokerError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| BrokerError::Tls(e.to_string()))?;

    tracing::info!(cert = %cert_path.display(), "TLS enabled");
    Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, BrokerError> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BrokerError::Tls(format!("{}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(BrokerError::Tls(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, BrokerError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| BrokerError::Tls(format!("{}: {e}", path.display())))?
        .ok_or_else(|| BrokerError::Tls(format!("{}: no private key found", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn unconfigured_is_plaintext() {
        assert!(load_acceptor(&TlsConfig::default()).unwrap().is_none());
    }

    #[test]
    fn missing_files_fall_back_to_plaintext() {
        let config = TlsConfig {
            cert_path: Some(PathBuf::from("/nonexistent/panelcast/cert.pem")),
            key_path: Some(PathBuf::from("/nonexistent/panelcast/key.pem")),
        };
        assert!(load_acceptor(&config).unwrap().is_none());
    }

    #[test]
    fn garbage_material_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();

        let config = TlsConfig {
            cert_path: Some(cert),
            key_path: Some(key),
        };
        assert!(matches!(load_acceptor(&config), Err(BrokerError::Tls(_))));
    }
}
