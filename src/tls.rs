//! TLS configuration and certificate loading.

use std::path::Path;
use std::sync::Arc;

use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;

use crate::error::Error;

/// Builds a TLS acceptor from a PEM certificate chain and a PEM private key.
///
/// The key may be PKCS#1, PKCS#8 or SEC1; the first one found is used. ALPN
/// advertises `h2` and `http/1.1`, matching what the connection builder
/// speaks.
pub(crate) async fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, Error> {
    let cert_pem = read(cert_path).await?;
    let key_pem = read(key_path).await?;

    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| Error::TlsFile { path: cert_path.to_owned(), source })?;
    if certs.is_empty() {
        return Err(Error::NoCertificates(cert_path.to_owned()));
    }

    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|source| Error::TlsFile { path: key_path.to_owned(), source })?
        .ok_or_else(|| Error::NoPrivateKey(key_path.to_owned()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

async fn read(path: &Path) -> Result<Vec<u8>, Error> {
    tokio::fs::read(path)
        .await
        .map_err(|source| Error::TlsFile { path: path.to_owned(), source })
}
