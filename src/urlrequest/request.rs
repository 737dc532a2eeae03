//! Fetch request value and per-request options.

use crate::base::abort::AbortSignal;
use crate::base::neterror::NetError;
use crate::http::cachepolicy::CacheRequest;
use crate::http::httpcache::CacheMode;
use crate::http::protocol::DriverRequest;
use crate::http::RequestBody;
use http::{HeaderMap, Method};
use std::str::FromStr;
use url::Url;

/// Default maximum number of redirects followed.
pub const DEFAULT_FOLLOW: u32 = 20;

/// What to do with a 3xx response carrying a `Location`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectMode {
    #[default]
    Follow,
    Manual,
    Error,
}

impl FromStr for RedirectMode {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "follow" => Ok(RedirectMode::Follow),
            "manual" => Ok(RedirectMode::Manual),
            "error" => Ok(RedirectMode::Error),
            other => Err(NetError::InvalidArgument(format!(
                "unknown redirect mode {:?}",
                other
            ))),
        }
    }
}

/// Options accepted by `fetch`.
#[derive(Debug)]
pub struct FetchOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub redirect: RedirectMode,
    pub cache: CacheMode,
    pub signal: Option<AbortSignal>,
    /// Advertise `gzip, deflate, br` in `accept-encoding`.
    pub compress: bool,
    /// Maximum redirects to follow.
    pub follow: u32,
    /// Decode the response body by `content-encoding`.
    pub decode: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            redirect: RedirectMode::Follow,
            cache: CacheMode::Default,
            signal: None,
            compress: true,
            follow: DEFAULT_FOLLOW,
            decode: true,
        }
    }
}

/// A request travelling through the redirect chain.
#[derive(Debug)]
pub struct Request {
    pub(crate) url: Url,
    pub(crate) method: Method,
    pub(crate) headers: HeaderMap,
    body: RequestBody,
    streamed: bool,
    pub(crate) redirect: RedirectMode,
    pub(crate) cache: CacheMode,
    pub(crate) signal: Option<AbortSignal>,
    pub(crate) compress: bool,
    pub(crate) follow: u32,
    pub(crate) decode: bool,
    /// Redirects followed so far.
    pub(crate) counter: u32,
}

impl Request {
    pub fn new(url: Url, options: FetchOptions) -> Result<Self, NetError> {
        if (options.method == Method::GET || options.method == Method::HEAD)
            && !options.body.is_empty()
        {
            return Err(NetError::InvalidArgument(format!(
                "{} request cannot have a body",
                options.method
            )));
        }
        Ok(Self {
            url,
            method: options.method,
            headers: options.headers,
            streamed: options.body.is_stream(),
            body: options.body,
            redirect: options.redirect,
            cache: options.cache,
            signal: options.signal,
            compress: options.compress,
            follow: options.follow,
            decode: options.decode,
            counter: 0,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Whether the body is a one-shot stream.
    pub fn has_stream_body(&self) -> bool {
        self.streamed
    }

    pub(crate) fn drop_body(&mut self) {
        self.body = RequestBody::Empty;
        self.streamed = false;
    }

    pub fn cache_request(&self) -> CacheRequest {
        CacheRequest::new(self.method.clone(), self.url.clone(), self.headers.clone())
    }

    /// The next hop for a driver. Byte bodies are shared; a stream body is
    /// handed out once and is empty afterwards.
    pub(crate) fn driver_request(&mut self) -> DriverRequest {
        let body = match self.body.try_clone() {
            Some(body) => body,
            None => std::mem::take(&mut self.body),
        };
        DriverRequest {
            method: self.method.clone(),
            headers: self.headers.clone(),
            body,
            signal: self.signal.clone(),
            decode: self.decode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn url() -> Url {
        Url::parse("http://example.com/").unwrap()
    }

    #[test]
    fn test_redirect_mode_parse() {
        assert_eq!("manual".parse::<RedirectMode>().unwrap(), RedirectMode::Manual);
        assert_eq!("error".parse::<RedirectMode>().unwrap(), RedirectMode::Error);
        assert!("sometimes".parse::<RedirectMode>().unwrap_err().is_usage_error());
    }

    #[test]
    fn test_get_with_body_rejected() {
        let options = FetchOptions {
            body: RequestBody::from("x"),
            ..FetchOptions::default()
        };
        let err = Request::new(url(), options).unwrap_err();
        assert!(err.is_usage_error());
    }

    #[test]
    fn test_bytes_body_replays() {
        let options = FetchOptions {
            method: Method::POST,
            body: RequestBody::from("payload"),
            ..FetchOptions::default()
        };
        let mut req = Request::new(url(), options).unwrap();
        for _ in 0..2 {
            match req.driver_request().body {
                RequestBody::Bytes(b) => assert_eq!(b, Bytes::from_static(b"payload")),
                other => panic!("unexpected body {:?}", other),
            }
        }
    }

    #[test]
    fn test_stream_body_handed_out_once() {
        let stream = futures::stream::iter(vec![Ok(Bytes::from_static(b"a"))]);
        let options = FetchOptions {
            method: Method::PUT,
            body: RequestBody::stream(stream),
            ..FetchOptions::default()
        };
        let mut req = Request::new(url(), options).unwrap();
        assert!(req.has_stream_body());
        assert!(req.driver_request().body.is_stream());
        assert!(matches!(req.driver_request().body, RequestBody::Empty));
    }

    #[test]
    fn test_defaults() {
        let options = FetchOptions::default();
        assert_eq!(options.follow, 20);
        assert!(options.compress);
        assert!(options.decode);
        assert_eq!(options.redirect, RedirectMode::Follow);
        assert_eq!(options.cache, CacheMode::Default);
    }
}
