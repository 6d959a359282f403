//! TLS context construction for explicit FTPS (`AUTH TLS`), using the modern
//! rustls 0.23 builder API — not the long-deprecated `rustls::internal::pemfile`
//! surface still found in older crates of this lineage.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

/// Installs the process-wide default `rustls` crypto provider, matching
/// whichever of the crate's `aws_lc_rs`/`ring` features is active. `rustls`
/// 0.23 requires this be called once before any `ServerConfig`/`ClientConfig`
/// is built; idempotent in practice since a second call's `Err` (already
/// installed) is discarded.
fn install_crypto_provider() {
    #[cfg(feature = "aws_lc_rs")]
    {
        let _ = tokio_rustls::rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
    #[cfg(all(feature = "ring", not(feature = "aws_lc_rs")))]
    {
        let _ = tokio_rustls::rustls::crypto::ring::default_provider().install_default();
    }
}

/// Loads a PEM certificate chain and private key and builds a `TlsAcceptor`
/// with no client-certificate requirement (FTPS clients authenticate via
/// `USER`/`PASS`, not mutual TLS).
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> std::io::Result<TlsAcceptor> {
    install_crypto_provider();
    let cert_file = std::fs::File::open(cert_path)?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "no certificates found in cert file"));
    }

    let key_file = std::fs::File::open(key_path)?;
    let mut key_reader = BufReader::new(key_file);
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "no private key found in key file"))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
