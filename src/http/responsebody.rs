//! Response body streaming.
//!
//! Wraps the protocol-specific body source (an HTTP/1 `Incoming`, an HTTP/2
//! `RecvStream`, or bytes already held in memory), applies content decoding
//! and honours the request's abort signal on every read.

use crate::base::abort::{with_abort, AbortSignal};
use crate::base::neterror::NetError;
use crate::http::decoder::ContentDecoder;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use std::any::Any;

enum Source {
    H1(Incoming),
    H2(h2::RecvStream),
    Buffered(Option<Bytes>),
}

impl Source {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, NetError> {
        match self {
            Source::H1(incoming) => loop {
                match incoming.frame().await {
                    None => return Ok(None),
                    Some(Ok(frame)) => {
                        if let Ok(data) = frame.into_data() {
                            return Ok(Some(data));
                        }
                        // Trailers carry no payload.
                    }
                    Some(Err(e)) => return Err(NetError::from(e)),
                }
            },
            Source::H2(recv) => match recv.data().await {
                None => Ok(None),
                Some(Ok(data)) => {
                    let _ = recv.flow_control().release_capacity(data.len());
                    Ok(Some(data))
                }
                Some(Err(e)) => Err(NetError::from(e)),
            },
            Source::Buffered(bytes) => Ok(bytes.take()),
        }
    }
}

/// Response body wrapper for streaming.
pub struct ResponseBody {
    source: Source,
    decoder: Option<ContentDecoder>,
    signal: Option<AbortSignal>,
    done: bool,
    /// Keeps the connection checked out until the body is dropped.
    _guard: Option<Box<dyn Any + Send>>,
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.source {
            Source::H1(_) => "h1",
            Source::H2(_) => "h2",
            Source::Buffered(_) => "buffered",
        };
        f.debug_struct("ResponseBody")
            .field("source", &kind)
            .field("decoder", &self.decoder)
            .field("done", &self.done)
            .finish()
    }
}

impl ResponseBody {
    fn from_source(source: Source) -> Self {
        Self {
            source,
            decoder: None,
            signal: None,
            done: false,
            _guard: None,
        }
    }

    pub fn h1(incoming: Incoming) -> Self {
        Self::from_source(Source::H1(incoming))
    }

    pub fn h2(recv: h2::RecvStream) -> Self {
        Self::from_source(Source::H2(recv))
    }

    /// Body already held in memory. Never decoded again.
    pub fn buffered(bytes: Bytes) -> Self {
        Self::from_source(Source::Buffered(Some(bytes)))
    }

    pub fn empty() -> Self {
        Self::buffered(Bytes::new())
    }

    pub fn with_decoder(mut self, decoder: Option<ContentDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_signal(mut self, signal: Option<AbortSignal>) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_guard<G: Any + Send>(mut self, guard: G) -> Self {
        self._guard = Some(Box::new(guard));
        self
    }

    /// The in-memory payload, for buffered bodies not yet read.
    pub fn as_buffered(&self) -> Option<&Bytes> {
        match &self.source {
            Source::Buffered(Some(bytes)) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.source, Source::Buffered(_))
    }

    /// Next decoded chunk, or `None` at end of body.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, NetError> {
        loop {
            if self.done {
                return Ok(None);
            }

            let signal = self.signal.clone();
            let raw = with_abort(signal.as_ref(), self.source.next_chunk()).await?;

            match raw {
                Some(data) => match self.decoder.as_mut() {
                    None => return Ok(Some(data)),
                    Some(decoder) => {
                        let decoded = decoder.decode(&data)?;
                        if !decoded.is_empty() {
                            return Ok(Some(decoded));
                        }
                    }
                },
                None => {
                    self.done = true;
                    let tail = match self.decoder.take() {
                        Some(decoder) => decoder.finish()?,
                        None => Bytes::new(),
                    };
                    return Ok((!tail.is_empty()).then_some(tail));
                }
            }
        }
    }

    /// Read entire body as bytes.
    pub async fn bytes(mut self) -> Result<Bytes, NetError> {
        if self.decoder.is_none() {
            if let Source::Buffered(bytes) = &mut self.source {
                return Ok(bytes.take().unwrap_or_default());
            }
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Read body as UTF-8 string.
    pub async fn text(self) -> Result<String, NetError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| NetError::InvalidUtf8)
    }

    /// Read body as JSON, deserializing to type T.
    #[cfg(feature = "json")]
    pub async fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, NetError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| NetError::JsonParseError(e.to_string()))
    }

    /// Consume as a stream of decoded chunks.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, NetError>> + Send {
        stream::try_unfold(self, |mut body| async move {
            Ok(body.chunk().await?.map(|chunk| (chunk, body)))
        })
    }
}
