//! Unified error type.

use std::io;
use std::path::PathBuf;

/// The error type returned by weft's fallible operations.
///
/// Application-level errors (404, 422, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// infrastructure failures: creating a listener, accepting connections, or
/// loading TLS material.
///
/// A clean shutdown is not an error. Every serving entry point returns
/// `Ok(())` once it has been asked to stop and has drained its connections.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The TCP or Unix listener could not be created.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The listener failed in a way that is not tied to a single connection.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// A certificate or key file could not be read or is not valid PEM.
    #[error("tls file {}: {source}", .path.display())]
    TlsFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificate found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    /// rustls rejected the certificate / key pair.
    #[error("tls: {0}")]
    Rustls(#[from] tokio_rustls::rustls::Error),

    /// Any other I/O failure, such as removing a Unix socket file after
    /// serving.
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn bind(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Bind { addr: addr.into(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_names_the_address() {
        let err = Error::bind("/tmp/app.sock", io::Error::from(io::ErrorKind::AddrInUse));
        let msg = err.to_string();
        assert!(msg.starts_with("failed to bind /tmp/app.sock"), "{msg}");
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert!(matches!(err, Error::Io(_)));
    }
}
