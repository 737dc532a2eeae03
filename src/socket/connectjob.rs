use crate::base::context::{IoResultExt, TlsResultExt};
use crate::base::neterror::NetError;
use crate::http::protocol::{host_of, port_of};
use crate::socket::client::SocketType;
use crate::socket::tls::TlsConfig;
use tokio::net::TcpStream;
use url::Url;

/// Establishes a connection: DNS -> TCP -> TLS.
///
/// Aborting is done by dropping the future; a partially built socket is
/// closed with it.
pub struct ConnectJob;

impl ConnectJob {
    /// Resolve and connect a TCP stream, trying each address in turn.
    pub async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream, NetError> {
        let addrs: Vec<_> = tokio::net::lookup_host((host, port))
            .await
            .dns_context(host)?
            .collect();
        if addrs.is_empty() {
            return Err(NetError::NameNotResolved);
        }

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    tracing::trace!(host, port, %addr, "TCP connected");
                    return Ok(stream);
                }
                Err(e) => {
                    tracing::debug!(host, port, %addr, error = %e, "TCP connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e).connection_context(host, port),
            None => Err(NetError::ConnectionFailed),
        }
    }

    /// Connect to the URL's origin. `tls` is required for `https`.
    pub async fn connect(url: &Url, tls: Option<&TlsConfig>) -> Result<SocketType, NetError> {
        let host = host_of(url)?;
        let port = port_of(url)?;
        let stream = Self::connect_tcp(&host, port).await?;

        if url.scheme() != "https" {
            return Ok(SocketType::Tcp(stream));
        }

        let default_tls;
        let tls = match tls {
            Some(tls) => tls,
            None => {
                default_tls = TlsConfig::default();
                &default_tls
            }
        };
        let connector = tls.connector()?;
        let config = tls.configure(&connector, &host)?;
        let tls_stream = tokio_boring::connect(config, &host, stream)
            .await
            .tls_context(&host)?;

        tracing::debug!(
            host = %host,
            port,
            alpn = ?tls_stream.ssl().selected_alpn_protocol().map(String::from_utf8_lossy),
            "TLS handshake complete"
        );
        Ok(SocketType::Ssl(tls_stream))
    }
}
