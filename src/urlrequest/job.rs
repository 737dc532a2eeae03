//! Fetch job: cache consultation, redirect handling and cache population.

use crate::base::neterror::NetError;
use crate::http::cachepolicy::CacheRequest;
use crate::http::httpcache::{CacheMode, HttpCache};
use crate::http::protocol::{origin_of, H2C_SCHEME};
use crate::http::push::{PushHub, PushSink};
use crate::http::response::HttpResponse;
use crate::urlrequest::context::RequestContext;
use crate::urlrequest::request::{RedirectMode, Request};
use http::header::{ACCEPT_ENCODING, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::sync::Arc;
use url::Url;

/// Value sent when `compress` is on and the caller set no `accept-encoding`.
const ACCEPT_ENCODING_ALL: &str = "gzip, deflate, br";

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

fn is_cacheable_method(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

/// Routes pushed responses into the response cache and to `on_push` subscribers.
#[derive(Debug)]
pub struct CachePushSink {
    cache: Arc<HttpCache>,
    hub: Arc<PushHub>,
}

impl CachePushSink {
    pub fn new(cache: Arc<HttpCache>, hub: Arc<PushHub>) -> Self {
        Self { cache, hub }
    }
}

impl PushSink for CachePushSink {
    fn wants_push(&self) -> bool {
        self.cache.is_enabled() || self.hub.has_subscribers()
    }

    fn deliver(
        &self,
        origin: &str,
        url: &Url,
        request_headers: &HeaderMap,
        response: &HttpResponse,
    ) {
        let request = CacheRequest::new(Method::GET, url.clone(), request_headers.clone());
        if let Some((policy, ttl)) = self.cache.admit(&request, response) {
            self.cache.insert(&request, policy, ttl, response);
        }
        self.hub.publish(origin, url, request_headers, response);
    }
}

/// Runs one `fetch` to completion.
pub struct FetchJob<'a> {
    context: &'a RequestContext,
    cache: &'a HttpCache,
}

impl<'a> FetchJob<'a> {
    pub fn new(context: &'a RequestContext, cache: &'a HttpCache) -> Self {
        Self { context, cache }
    }

    pub async fn run(&self, mut request: Request) -> Result<HttpResponse, NetError> {
        if request.signal.as_ref().is_some_and(|s| s.is_aborted()) {
            return Err(NetError::Aborted);
        }
        if request.compress && !request.headers.contains_key(ACCEPT_ENCODING) {
            request
                .headers
                .insert(ACCEPT_ENCODING, HeaderValue::from_static(ACCEPT_ENCODING_ALL));
        }

        loop {
            let cacheable = is_cacheable_method(&request.method);
            if cacheable && request.cache.reads() {
                if let Some(mut hit) = self.cache.lookup(&request.cache_request(), request.cache) {
                    tracing::debug!(url = %request.url, "Cache hit");
                    hit.set_redirected(request.counter > 0);
                    return Ok(hit);
                }
            }
            if request.cache == CacheMode::OnlyIfCached {
                return Err(NetError::CacheMiss);
            }

            let url = request.url.clone();
            let mut response = self.context.request(&url, request.driver_request()).await?;

            if let Some(next) = self.follow(&mut request, &response)? {
                tracing::debug!(
                    from = %url,
                    to = %next,
                    status = %response.status(),
                    counter = request.counter,
                    "Following redirect"
                );
                drop(response);
                continue;
            }

            response.set_redirected(request.counter > 0);
            if cacheable && request.cache.writes() && self.cache.is_enabled() {
                return self.cache.store(&request.cache_request(), response).await;
            }
            return Ok(response);
        }
    }

    /// Apply the redirect rules to `response`.
    ///
    /// Returns the next URL after rewriting `request` for it, or `None` when
    /// the response goes back to the caller as is.
    fn follow(
        &self,
        request: &mut Request,
        response: &HttpResponse,
    ) -> Result<Option<Url>, NetError> {
        let status = response.status();
        if !is_redirect(status) {
            return Ok(None);
        }

        match request.redirect {
            RedirectMode::Manual => return Ok(None),
            RedirectMode::Error => {
                return Err(NetError::RedirectNotAllowed(request.url.to_string()));
            }
            RedirectMode::Follow => {}
        }

        let Some(location) = response.headers().get(LOCATION) else {
            return Ok(None);
        };
        let target = location
            .to_str()
            .ok()
            .and_then(|loc| request.url.join(loc).ok())
            .ok_or_else(|| {
                let raw = String::from_utf8_lossy(location.as_bytes()).into_owned();
                NetError::UnsupportedRedirect(raw)
            })?;
        if !matches!(target.scheme(), "http" | "https" | H2C_SCHEME) {
            return Err(NetError::UnsupportedRedirect(target.to_string()));
        }

        if request.counter >= request.follow {
            return Err(NetError::TooManyRedirects(request.follow));
        }

        if request.has_stream_body() && status != StatusCode::SEE_OTHER {
            return Err(NetError::UnsupportedRedirect(target.to_string()));
        }

        let to_get = status == StatusCode::SEE_OTHER
            || (matches!(status.as_u16(), 301 | 302) && request.method == Method::POST);
        if to_get {
            request.method = Method::GET;
            request.drop_body();
            request.headers.remove(CONTENT_LENGTH);
            request.headers.remove(CONTENT_TYPE);
        }

        if origin_of(&target)? != origin_of(&request.url)? {
            request.headers.remove(AUTHORIZATION);
        }

        request.counter += 1;
        request.url = target.clone();
        Ok(Some(target))
    }
}
