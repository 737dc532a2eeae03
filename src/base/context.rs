//! Ergonomic error context helpers.
//!
//! Provides extension traits for adding context to `Result` types,
//! converting IO errors into context-rich `NetError` variants.

use crate::base::neterror::NetError;
use std::io;
use std::sync::Arc;

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Add connection context to an IO error.
    ///
    /// # Example
    /// ```ignore
    /// use fetchnet::base::context::IoResultExt;
    ///
    /// let stream = TcpStream::connect(addr).await
    ///     .connection_context("example.com", 443)?;
    /// // Error: "Connection to example.com:443 failed: connection refused"
    /// ```
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError>;

    /// Add DNS resolution context to an IO error.
    fn dns_context(self, domain: &str) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError> {
        self.map_err(|e| NetError::ConnectionFailedTo {
            host: host.to_string(),
            port,
            source: Arc::new(e),
        })
    }

    fn dns_context(self, domain: &str) -> Result<T, NetError> {
        self.map_err(|e| NetError::NameNotResolvedFor {
            domain: domain.to_string(),
            source: Arc::new(e),
        })
    }
}

/// Extension trait for TLS handshake results.
pub trait TlsResultExt<T> {
    /// Attach the target host to a handshake failure.
    fn tls_context(self, host: &str) -> Result<T, NetError>;
}

impl<T, E: std::fmt::Debug> TlsResultExt<T> for Result<T, E> {
    fn tls_context(self, host: &str) -> Result<T, NetError> {
        self.map_err(|e| NetError::SslHandshakeFailed {
            host: host.to_string(),
            reason: format!("{:?}", e),
        })
    }
}
