use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Network error codes, named after Chromium's `net_error_list.h`.
///
/// Every variant maps to a stable negative code through [`NetError::as_i32`].
#[derive(Debug, Error, Clone)]
pub enum NetError {
    // Generic
    #[error("The operation was aborted")]
    Aborted,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Connection to {host}:{port} failed: {source}")]
    ConnectionFailedTo {
        host: String,
        port: u16,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Could not resolve {domain}: {source}")]
    NameNotResolvedFor {
        domain: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("TLS handshake with {host} failed: {reason}")]
    SslHandshakeFailed { host: String, reason: String },
    #[error("ALPN negotiation failed: server selected {0:?}")]
    AlpnNegotiationFailed(String),
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    // HTTP Errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Unknown URL scheme: {0}")]
    UnknownUrlScheme(String),
    #[error("Redirect not allowed: {0}")]
    RedirectNotAllowed(String),
    #[error("Unsupported redirect: {0}")]
    UnsupportedRedirect(String),
    #[error("Too many redirects (max {0})")]
    TooManyRedirects(u32),
    #[error("Invalid HTTP response")]
    InvalidHttpResponse,
    #[error("Empty response")]
    EmptyResponse,
    #[error("Content decoding failed: {0}")]
    ContentDecodingFailed(String),
    #[error("HTTP/2 protocol error: {0}")]
    Http2ProtocolError(String),
    #[error("HTTP/2 server refused stream")]
    Http2ServerRefusedStream,
    #[error("HTTP/2 stream closed")]
    Http2StreamClosed,
    #[error("HTTP/1.1 required")]
    Http11Required,
    #[error("Cache miss")]
    CacheMiss,

    // Body Errors
    #[error("Response body already consumed or unavailable")]
    HttpBodyError,
    #[error("Response body is not valid UTF-8")]
    InvalidUtf8,
    #[error("Response body is not valid JSON: {0}")]
    JsonParseError(String),
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::Aborted => -3,
            NetError::InvalidArgument(_) => -4,
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionFailed => -104,
            NetError::ConnectionFailedTo { .. } => -104,
            NetError::NameNotResolved => -105,
            NetError::NameNotResolvedFor { .. } => -105,
            NetError::SslProtocolError => -107,
            NetError::SslHandshakeFailed { .. } => -107,
            NetError::ConnectionTimedOut => -118,
            NetError::AlpnNegotiationFailed(_) => -122,
            NetError::Io(_) => -15,
            NetError::InvalidUrl => -300,
            NetError::UnknownUrlScheme(_) => -302,
            NetError::UnsupportedRedirect(_) => -303,
            NetError::TooManyRedirects(_) => -310,
            NetError::InvalidHttpResponse => -370,
            NetError::EmptyResponse => -324,
            NetError::ContentDecodingFailed(_) => -330,
            NetError::Http2ProtocolError(_) => -337,
            NetError::Http2ServerRefusedStream => -351,
            NetError::Http11Required => -365,
            NetError::Http2StreamClosed => -376,
            NetError::CacheMiss => -400,
            // Custom codes (outside Chromium's ranges)
            NetError::RedirectNotAllowed(_) => -10001,
            NetError::HttpBodyError => -10002,
            NetError::InvalidUtf8 => -10003,
            NetError::JsonParseError(_) => -10004,
        }
    }

    /// True when the error was caused by a fired cancellation signal.
    pub fn is_abort(&self) -> bool {
        matches!(self, NetError::Aborted)
    }

    /// Machine-readable sub-type for redirect policy violations.
    pub fn fetch_error_type(&self) -> Option<&'static str> {
        match self {
            NetError::RedirectNotAllowed(_) => Some("no-redirect"),
            NetError::TooManyRedirects(_) => Some("max-redirect"),
            NetError::UnsupportedRedirect(_) => Some("unsupported-redirect"),
            _ => None,
        }
    }

    /// Errors caused by the caller rather than the network. Never worth retrying.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            NetError::InvalidArgument(_) | NetError::InvalidUrl | NetError::UnknownUrlScheme(_)
        )
    }

    /// Map an I/O error onto the closest network error.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            io::ErrorKind::ConnectionReset => NetError::ConnectionReset,
            io::ErrorKind::TimedOut => NetError::ConnectionTimedOut,
            io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => {
                NetError::ConnectionClosed
            }
            _ => NetError::Io(Arc::new(err)),
        }
    }
}

impl From<io::Error> for NetError {
    fn from(err: io::Error) -> Self {
        NetError::from_io(err)
    }
}

impl From<h2::Error> for NetError {
    fn from(err: h2::Error) -> Self {
        if let Some(reason) = err.reason() {
            return match reason {
                h2::Reason::HTTP_1_1_REQUIRED => NetError::Http11Required,
                h2::Reason::REFUSED_STREAM => NetError::Http2ServerRefusedStream,
                h2::Reason::CANCEL | h2::Reason::STREAM_CLOSED => NetError::Http2StreamClosed,
                other => NetError::Http2ProtocolError(format!("{:?}", other)),
            };
        }
        if err.is_io() {
            return match err.into_io() {
                Some(io) => NetError::from_io(io),
                None => NetError::ConnectionClosed,
            };
        }
        NetError::Http2ProtocolError(err.to_string())
    }
}

impl From<hyper::Error> for NetError {
    fn from(err: hyper::Error) -> Self {
        if err.is_parse() || err.is_parse_status() {
            return NetError::InvalidHttpResponse;
        }
        if err.is_incomplete_message() {
            return NetError::EmptyResponse;
        }
        if err.is_canceled() || err.is_closed() {
            return NetError::ConnectionClosed;
        }
        if err.is_timeout() {
            return NetError::ConnectionTimedOut;
        }
        let io_kind = std::error::Error::source(&err)
            .and_then(|source| source.downcast_ref::<io::Error>())
            .map(|io| io.kind());
        match io_kind {
            Some(kind) => NetError::from_io(io::Error::new(kind, err.to_string())),
            None => NetError::ConnectionFailed,
        }
    }
}
