//! Wire protocol selection.
//!
//! The negotiated protocol is a closed set; each variant is served by one
//! [`ProtocolDriver`] owned by the request context.

use crate::base::abort::AbortSignal;
use crate::base::neterror::NetError;
use crate::http::requestbody::RequestBody;
use crate::http::response::HttpResponse;
use crate::socket::client::NegotiatedSocket;
use futures::future::BoxFuture;
use http::{HeaderMap, Method, Version};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Scheme denoting HTTP/2 over cleartext TCP.
pub const H2C_SCHEME: &str = "http2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// HTTP/2 over TLS.
    Http2,
    /// HTTP/2 over cleartext TCP (prior knowledge).
    Http2Cleartext,
    Http11,
    Http10,
}

impl Protocol {
    /// ALPN token as sent on the wire.
    pub fn alpn_id(&self) -> &'static str {
        match self {
            Protocol::Http2 => "h2",
            Protocol::Http2Cleartext => "h2c",
            Protocol::Http11 => "http/1.1",
            Protocol::Http10 => "http/1.0",
        }
    }

    /// Map the server's ALPN selection. No selection means HTTP/1.1.
    pub fn from_alpn(selected: Option<&[u8]>) -> Result<Self, NetError> {
        match selected {
            None => Ok(Protocol::Http11),
            Some(b"h2") => Ok(Protocol::Http2),
            Some(b"http/1.1") => Ok(Protocol::Http11),
            Some(b"http/1.0") => Ok(Protocol::Http10),
            Some(other) => Err(NetError::AlpnNegotiationFailed(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    pub fn is_http2(&self) -> bool {
        matches!(self, Protocol::Http2 | Protocol::Http2Cleartext)
    }

    pub fn is_http1(&self) -> bool {
        !self.is_http2()
    }

    /// Whether the token can be offered in a TLS ClientHello.
    pub fn is_tls_alpn(&self) -> bool {
        !matches!(self, Protocol::Http2Cleartext)
    }

    pub fn version(&self) -> Version {
        match self {
            Protocol::Http2 | Protocol::Http2Cleartext => Version::HTTP_2,
            Protocol::Http11 => Version::HTTP_11,
            Protocol::Http10 => Version::HTTP_10,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alpn_id())
    }
}

impl FromStr for Protocol {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h2" => Ok(Protocol::Http2),
            "h2c" => Ok(Protocol::Http2Cleartext),
            "http/1.1" => Ok(Protocol::Http11),
            "http/1.0" => Ok(Protocol::Http10),
            other => Err(NetError::InvalidArgument(format!(
                "unknown protocol {:?}",
                other
            ))),
        }
    }
}

/// Host part of a URL, without IPv6 brackets.
pub fn host_of(url: &Url) -> Result<String, NetError> {
    let host = url.host_str().ok_or(NetError::InvalidUrl)?;
    Ok(host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string())
}

/// Port of a URL, with defaults for the supported schemes.
pub fn port_of(url: &Url) -> Result<u16, NetError> {
    if let Some(port) = url.port_or_known_default() {
        return Ok(port);
    }
    match url.scheme() {
        H2C_SCHEME => Ok(80),
        _ => Err(NetError::InvalidUrl),
    }
}

/// Connection key: `scheme://host:port`.
pub fn origin_of(url: &Url) -> Result<String, NetError> {
    let host = url.host_str().ok_or(NetError::InvalidUrl)?;
    Ok(format!("{}://{}:{}", url.scheme(), host, port_of(url)?))
}

/// `host[:port]` as used in `Host` and `:authority`; default ports are omitted.
pub fn authority_of(url: &Url) -> Result<String, NetError> {
    let host = url.host_str().ok_or(NetError::InvalidUrl)?;
    let port = port_of(url)?;
    let default = match url.scheme() {
        "https" => 443,
        _ => 80,
    };
    if port == default {
        Ok(host.to_string())
    } else {
        Ok(format!("{}:{}", host, port))
    }
}

/// A single hop handed to a protocol driver.
pub struct DriverRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub signal: Option<AbortSignal>,
    pub decode: bool,
}

impl fmt::Debug for DriverRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRequest")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("decode", &self.decode)
            .finish()
    }
}

/// Common interface of the HTTP/1.x and HTTP/2 drivers.
///
/// Construction sets a driver up for one context; `reset` tears down every
/// cached connection while in-flight requests finish on their own handles.
pub trait ProtocolDriver: Send + Sync {
    fn request<'a>(
        &'a self,
        url: &'a Url,
        protocol: Protocol,
        request: DriverRequest,
        socket: Option<NegotiatedSocket>,
    ) -> BoxFuture<'a, Result<HttpResponse, NetError>>;

    fn reset(&self);
}
