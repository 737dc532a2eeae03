//! Streaming content decoding for `gzip`, `deflate` and `br` bodies.

use crate::base::neterror::NetError;
use bytes::Bytes;
use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};
use http::header::CONTENT_ENCODING;
use http::{HeaderMap, Method, StatusCode};
use std::io::Write;

const BROTLI_BUFFER: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Gzip,
    Deflate,
    Brotli,
}

impl ContentEncoding {
    pub fn from_header(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(ContentEncoding::Gzip),
            "deflate" | "x-deflate" => Some(ContentEncoding::Deflate),
            "br" => Some(ContentEncoding::Brotli),
            _ => None,
        }
    }
}

enum Inner {
    Gzip(GzDecoder<Vec<u8>>),
    /// Deflate framing is picked from the first byte: zlib or raw.
    DeflatePending,
    Zlib(ZlibDecoder<Vec<u8>>),
    RawDeflate(DeflateDecoder<Vec<u8>>),
    Brotli(Box<brotli::DecompressorWriter<Vec<u8>>>),
}

pub struct ContentDecoder {
    inner: Inner,
}

impl std::fmt::Debug for ContentDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.inner {
            Inner::Gzip(_) => "gzip",
            Inner::DeflatePending | Inner::Zlib(_) | Inner::RawDeflate(_) => "deflate",
            Inner::Brotli(_) => "br",
        };
        f.debug_struct("ContentDecoder").field("encoding", &kind).finish()
    }
}

fn decode_error(e: std::io::Error) -> NetError {
    NetError::ContentDecodingFailed(e.to_string())
}

fn take(out: &mut Vec<u8>) -> Bytes {
    Bytes::from(std::mem::take(out))
}

impl ContentDecoder {
    pub fn new(encoding: ContentEncoding) -> Self {
        let inner = match encoding {
            ContentEncoding::Gzip => Inner::Gzip(GzDecoder::new(Vec::new())),
            ContentEncoding::Deflate => Inner::DeflatePending,
            ContentEncoding::Brotli => Inner::Brotli(Box::new(brotli::DecompressorWriter::new(
                Vec::new(),
                BROTLI_BUFFER,
            ))),
        };
        Self { inner }
    }

    /// Decoder for a response, or `None` when the body is passed through.
    ///
    /// Bodies of HEAD requests, 204 and 304 responses are never decoded.
    /// Unknown encodings are passed through untouched.
    pub fn for_response(
        method: &Method,
        status: StatusCode,
        headers: &HeaderMap,
        decode: bool,
    ) -> Option<Self> {
        if !decode
            || method == Method::HEAD
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
        {
            return None;
        }
        let value = headers.get(CONTENT_ENCODING)?.to_str().ok()?;
        ContentEncoding::from_header(value).map(Self::new)
    }

    /// Feed a chunk of encoded input; returns whatever decoded output is ready.
    pub fn decode(&mut self, input: &[u8]) -> Result<Bytes, NetError> {
        if input.is_empty() {
            return Ok(Bytes::new());
        }
        if matches!(self.inner, Inner::DeflatePending) {
            // zlib header: CM=8 in the low nibble of the first byte.
            self.inner = if input[0] & 0x0f == 0x08 {
                Inner::Zlib(ZlibDecoder::new(Vec::new()))
            } else {
                Inner::RawDeflate(DeflateDecoder::new(Vec::new()))
            };
        }

        match &mut self.inner {
            Inner::Gzip(d) => {
                d.write_all(input).map_err(decode_error)?;
                d.flush().map_err(decode_error)?;
                Ok(take(d.get_mut()))
            }
            Inner::Zlib(d) => {
                d.write_all(input).map_err(decode_error)?;
                d.flush().map_err(decode_error)?;
                Ok(take(d.get_mut()))
            }
            Inner::RawDeflate(d) => {
                d.write_all(input).map_err(decode_error)?;
                d.flush().map_err(decode_error)?;
                Ok(take(d.get_mut()))
            }
            Inner::Brotli(d) => {
                d.write_all(input).map_err(decode_error)?;
                d.flush().map_err(decode_error)?;
                Ok(take(d.get_mut()))
            }
            Inner::DeflatePending => Ok(Bytes::new()),
        }
    }

    /// Flush the tail of the stream once input is exhausted.
    pub fn finish(self) -> Result<Bytes, NetError> {
        let out = match self.inner {
            Inner::Gzip(d) => d.finish().map_err(decode_error)?,
            Inner::Zlib(d) => d.finish().map_err(decode_error)?,
            Inner::RawDeflate(d) => d.finish().map_err(decode_error)?,
            Inner::Brotli(d) => d.into_inner().map_err(|_| {
                NetError::ContentDecodingFailed("truncated brotli stream".to_string())
            })?,
            Inner::DeflatePending => Vec::new(),
        };
        Ok(Bytes::from(out))
    }
}
