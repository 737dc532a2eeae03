//! HTTP Client with builder pattern.
//!
//! A [`Client`] is one isolated context: its own ALPN cache, HTTP/1 agent,
//! HTTP/2 sessions and response cache. Clones share that state.
//!
//! # Example
//!
//! ```rust,ignore
//! use fetchnet::Client;
//!
//! let client = Client::builder().keep_alive(true).build()?;
//!
//! let resp = client.get("https://example.com")
//!     .header("accept", "text/html")
//!     .send()
//!     .await?;
//! println!("{} {}", resp.status(), resp.text().await?);
//! ```

use crate::base::abort::AbortSignal;
use crate::base::neterror::NetError;
use crate::http::httpcache::{CacheMode, CacheStats, HttpCache};
use crate::http::push::{PushHub, PushRejector, PushSubscription};
use crate::http::{HttpResponse, Protocol, RequestBody};
use crate::urlrequest::context::{ContextOptions, Http1Options, Http2Options, RequestContext};
use crate::urlrequest::job::{CachePushSink, FetchJob};
use crate::urlrequest::request::{FetchOptions, RedirectMode, Request};
use http::{HeaderMap, Method};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

static GLOBAL: OnceCell<Client> = OnceCell::new();

/// Build the process-wide default client. Fails if it already exists.
pub fn init(options: ContextOptions) -> Result<&'static Client, NetError> {
    let client = Client::with_options(options)?;
    GLOBAL
        .set(client)
        .map_err(|_| NetError::InvalidArgument("default client already initialized".to_string()))?;
    GLOBAL
        .get()
        .ok_or_else(|| NetError::InvalidArgument("default client not initialized".to_string()))
}

/// The default client, once [`init`] has run.
pub fn global() -> Option<&'static Client> {
    GLOBAL.get()
}

/// `fetch` on the default client.
pub async fn fetch(url: &str, options: FetchOptions) -> Result<HttpResponse, NetError> {
    let client = global()
        .ok_or_else(|| NetError::InvalidArgument("default client not initialized".to_string()))?;
    client.fetch(url, options).await
}

/// Append `query` to `url` as form-encoded pairs.
pub fn create_url<I, K, V>(url: &str, query: I) -> Result<Url, NetError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut url = Url::parse(url).map_err(|_| NetError::InvalidUrl)?;
    let pairs: Vec<(K, V)> = query.into_iter().collect();
    if !pairs.is_empty() {
        let mut serializer = url.query_pairs_mut();
        for (key, value) in &pairs {
            serializer.append_pair(key.as_ref(), value.as_ref());
        }
    }
    Ok(url)
}

struct ClientInner {
    context: RequestContext,
    cache: Arc<HttpCache>,
    hub: Arc<PushHub>,
}

/// HTTP Client for making requests.
///
/// Use [`Client::builder()`] to configure and create a client.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("context", &self.inner.context)
            .field("cache", &self.inner.cache.stats())
            .field("push_subscribers", &self.inner.hub.subscriber_count())
            .finish()
    }
}

impl Client {
    /// Create a client with default options.
    pub fn new() -> Result<Self, NetError> {
        Self::with_options(ContextOptions::default())
    }

    pub fn with_options(options: ContextOptions) -> Result<Self, NetError> {
        options.validate()?;
        let cache = Arc::new(HttpCache::with_limits(
            options.max_cache_entries,
            options.max_cache_size,
        ));
        let hub = Arc::new(PushHub::new());
        let sink = Arc::new(CachePushSink::new(cache.clone(), hub.clone()));
        let context = RequestContext::new(options, sink)?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                context,
                cache,
                hub,
            }),
        })
    }

    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Client without a response cache.
    pub fn no_cache() -> Result<Self, NetError> {
        Self::with_options(ContextOptions::no_cache())
    }

    /// Client that only speaks HTTP/1.1.
    pub fn h1() -> Result<Self, NetError> {
        Self::with_options(ContextOptions::h1())
    }

    /// Client with HTTP/1 keep-alive.
    pub fn keep_alive() -> Result<Self, NetError> {
        Self::with_options(ContextOptions::keep_alive())
    }

    pub fn h1_no_cache() -> Result<Self, NetError> {
        Self::with_options(ContextOptions::h1_no_cache())
    }

    pub fn keep_alive_no_cache() -> Result<Self, NetError> {
        Self::with_options(ContextOptions::keep_alive_no_cache())
    }

    /// A new, isolated client. Nothing is shared with `self`.
    pub fn context(&self, options: ContextOptions) -> Result<Self, NetError> {
        Self::with_options(options)
    }

    pub fn options(&self) -> &ContextOptions {
        self.inner.context.options()
    }

    /// Fetch `url`.
    pub async fn fetch(&self, url: &str, options: FetchOptions) -> Result<HttpResponse, NetError> {
        let url = Url::parse(url).map_err(|_| NetError::InvalidUrl)?;
        self.fetch_url(url, options).await
    }

    pub async fn fetch_url(
        &self,
        url: Url,
        options: FetchOptions,
    ) -> Result<HttpResponse, NetError> {
        let request = Request::new(url, options)?;
        FetchJob::new(&self.inner.context, &self.inner.cache)
            .run(request)
            .await
    }

    /// Start building a GET request.
    pub fn get<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Start building a POST request.
    pub fn post<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Start building a PUT request.
    pub fn put<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Start building a DELETE request.
    pub fn delete<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Start building a HEAD request.
    pub fn head<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    /// Start building a PATCH request.
    pub fn patch<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    /// Start building a request with custom method.
    pub fn request<U: AsRef<str>>(&self, method: Method, url: U) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            url: url.as_ref().to_string(),
            options: FetchOptions {
                method,
                ..FetchOptions::default()
            },
        }
    }

    /// Close every session and idle connection; forget ALPN decisions and cached responses.
    pub fn reset(&self) {
        self.inner.context.reset();
        self.inner.cache.clear();
    }

    /// Subscribe to pushed responses. Drop the subscription, or pass it to
    /// [`off_push`](Self::off_push), to stop receiving.
    pub fn on_push(&self) -> PushSubscription {
        self.inner.hub.subscribe()
    }

    pub fn off_push(&self, subscription: PushSubscription) {
        self.inner.hub.unsubscribe(subscription.id());
    }

    /// See [`create_url`].
    pub fn create_url<I, K, V>(&self, url: &str, query: I) -> Result<Url, NetError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        create_url(url, query)
    }

    /// A signal that fires after `delay`.
    pub fn timeout_signal(&self, delay: Duration) -> AbortSignal {
        AbortSignal::timeout(delay)
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// TLS ALPN probes performed by this client.
    pub fn alpn_probe_count(&self) -> usize {
        self.inner.context.alpn_probe_count()
    }

    /// Protocol remembered for an origin such as `https://example.com:443`.
    pub fn cached_protocol(&self, origin: &str) -> Option<Protocol> {
        self.inner.context.cached_protocol(origin)
    }

    /// Number of open HTTP/2 sessions.
    pub fn h2_session_count(&self) -> usize {
        self.inner.context.h2_session_count()
    }

    /// Idle HTTP/1 keep-alive connections.
    pub fn h1_idle_count(&self) -> usize {
        self.inner.context.h1_idle_count()
    }
}

/// Builder for creating a [`Client`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    options: ContextOptions,
}

impl ClientBuilder {
    /// Protocol preference order for ALPN.
    pub fn alpn_protocols(mut self, protocols: Vec<Protocol>) -> Self {
        self.options.alpn_protocols = protocols;
        self
    }

    pub fn alpn_cache(mut self, size: usize, ttl: Duration) -> Self {
        self.options.alpn_cache_size = size;
        self.options.alpn_cache_ttl = ttl;
        self
    }

    /// Response cache byte budget; zero disables caching.
    pub fn max_cache_size(mut self, bytes: usize) -> Self {
        self.options.max_cache_size = bytes;
        self
    }

    pub fn max_cache_entries(mut self, entries: usize) -> Self {
        self.options.max_cache_entries = entries;
        self
    }

    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.options.user_agent = user_agent.into();
        self
    }

    /// Verify server certificates (default `true`).
    pub fn reject_unauthorized(mut self, verify: bool) -> Self {
        self.options.reject_unauthorized = verify;
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.options.h1.keep_alive = keep_alive;
        self
    }

    pub fn h1_options(mut self, options: Http1Options) -> Self {
        self.options.h1 = options;
        self
    }

    pub fn h2_options(mut self, options: Http2Options) -> Self {
        self.options.h2 = options;
        self
    }

    pub fn enable_push(mut self, enable: bool) -> Self {
        self.options.h2.enable_push = enable;
        self
    }

    /// Called for every PUSH_PROMISE; the handler may reject it.
    pub fn push_promise_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Url, &HeaderMap, &PushRejector) + Send + Sync + 'static,
    {
        self.options.h2.push_promise_handler = Some(Arc::new(handler));
        self
    }

    /// Called with every accepted pushed response.
    pub fn push_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Url, &HeaderMap, HttpResponse) + Send + Sync + 'static,
    {
        self.options.h2.push_handler = Some(Arc::new(handler));
        self
    }

    /// Start from a full set of options.
    pub fn options(mut self, options: ContextOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<Client, NetError> {
        Client::with_options(self.options)
    }
}

/// Builder for a single request.
pub struct RequestBuilder {
    client: Client,
    url: String,
    options: FetchOptions,
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("url", &self.url)
            .field("options", &self.options)
            .finish()
    }
}

impl RequestBuilder {
    /// Add a header.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: http::header::IntoHeaderName,
        V: TryInto<http::HeaderValue>,
    {
        if let Ok(val) = value.try_into() {
            self.options.headers.insert(key, val);
        }
        self
    }

    /// Set request body.
    pub fn body<B: Into<RequestBody>>(mut self, body: B) -> Self {
        self.options.body = body.into();
        self
    }

    /// Set JSON body.
    #[cfg(feature = "json")]
    pub fn json<T: serde::Serialize>(mut self, json: &T) -> Self {
        if let Ok(bytes) = serde_json::to_vec(json) {
            self.options.body = RequestBody::from(bytes);
            self.options.headers.insert(
                http::header::CONTENT_TYPE,
                http::HeaderValue::from_static("application/json"),
            );
        }
        self
    }

    pub fn redirect(mut self, mode: RedirectMode) -> Self {
        self.options.redirect = mode;
        self
    }

    /// Maximum redirects to follow.
    pub fn follow(mut self, max: u32) -> Self {
        self.options.follow = max;
        self
    }

    pub fn cache(mut self, mode: CacheMode) -> Self {
        self.options.cache = mode;
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.options.signal = Some(signal);
        self
    }

    /// Abort the request if it takes longer than `timeout`.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.signal(AbortSignal::timeout(timeout))
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.options.compress = compress;
        self
    }

    pub fn decode(mut self, decode: bool) -> Self {
        self.options.decode = decode;
        self
    }

    /// Send the request.
    pub async fn send(self) -> Result<HttpResponse, NetError> {
        self.client.fetch(&self.url, self.options).await
    }
}
