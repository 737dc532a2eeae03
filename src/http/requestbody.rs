//! Request body for POST/PUT operations.

use crate::base::neterror::NetError;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use http_body::Frame;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use std::convert::Infallible;
use std::fmt;

/// Body type handed to hyper.
pub type BodyWrapper = UnsyncBoxBody<Bytes, NetError>;

/// Chunked body source.
pub type BodyStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Request body for HTTP methods that send data.
///
/// Byte bodies can be replayed across redirects; stream bodies are read once.
#[derive(Default)]
pub enum RequestBody {
    /// No body (GET, HEAD, DELETE).
    #[default]
    Empty,
    /// Body with raw bytes.
    Bytes(Bytes),
    /// Body produced incrementally.
    Stream(BodyStream),
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            RequestBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Bytes(Bytes::from(s))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(v: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(v))
    }
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        RequestBody::Bytes(Bytes::from(s.to_owned()))
    }
}

impl From<&[u8]> for RequestBody {
    fn from(b: &[u8]) -> Self {
        RequestBody::Bytes(Bytes::copy_from_slice(b))
    }
}

impl From<Bytes> for RequestBody {
    fn from(b: Bytes) -> Self {
        RequestBody::Bytes(b)
    }
}

impl RequestBody {
    /// Wrap a stream of chunks.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
    {
        RequestBody::Stream(stream.boxed())
    }

    /// Check if the body is empty.
    pub fn is_empty(&self) -> bool {
        match self {
            RequestBody::Empty => true,
            RequestBody::Bytes(b) => b.is_empty(),
            RequestBody::Stream(_) => false,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, RequestBody::Stream(_))
    }

    /// Exact length when known up front.
    pub fn content_length(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Bytes(b) => Some(b.len() as u64),
            RequestBody::Stream(_) => None,
        }
    }

    /// Copy for a replay. Streams cannot be copied.
    pub fn try_clone(&self) -> Option<Self> {
        match self {
            RequestBody::Empty => Some(RequestBody::Empty),
            RequestBody::Bytes(b) => Some(RequestBody::Bytes(b.clone())),
            RequestBody::Stream(_) => None,
        }
    }

    /// Convert into a hyper-compatible body.
    pub fn into_body(self) -> BodyWrapper {
        match self {
            RequestBody::Empty => Empty::<Bytes>::new()
                .map_err(|never: Infallible| match never {})
                .boxed_unsync(),
            RequestBody::Bytes(b) => Full::new(b)
                .map_err(|never: Infallible| match never {})
                .boxed_unsync(),
            RequestBody::Stream(s) => {
                StreamBody::new(s.map(|chunk| chunk.map(Frame::data).map_err(NetError::from)))
                    .boxed_unsync()
            }
        }
    }
}
