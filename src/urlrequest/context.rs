//! Request context: the per-client network state.
//!
//! A [`RequestContext`] owns the ALPN negotiator with its decision cache, the
//! HTTP/1.x driver with its agent and the HTTP/2 driver with its session
//! cache. Nothing in it is shared with other contexts.

use crate::base::neterror::NetError;
use crate::http::h1::Http1Driver;
use crate::http::h2::Http2Driver;
use crate::http::httpcache::{DEFAULT_MAX_CACHE_ENTRIES, DEFAULT_MAX_CACHE_SIZE};
use crate::http::protocol::{DriverRequest, Protocol, ProtocolDriver};
use crate::http::push::PushSink;
use crate::http::response::HttpResponse;
use crate::socket::alpn::AlpnNegotiator;
use crate::socket::pool::AgentOptions;
use http::header::USER_AGENT;
use http::HeaderValue;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub use crate::http::h2::Http2Options;

/// Default `user-agent` header value.
pub const DEFAULT_USER_AGENT: &str = concat!("fetchnet/", env!("CARGO_PKG_VERSION"));

/// HTTP/1.x agent options.
#[derive(Debug, Clone)]
pub struct Http1Options {
    /// Keep connections open and reuse them.
    pub keep_alive: bool,
    /// Maximum concurrent connections per origin; `None` is unlimited.
    pub max_sockets: Option<usize>,
    /// Maximum idle connections kept per origin.
    pub max_free_sockets: usize,
    /// Idle connections older than this are closed.
    pub idle_timeout: Duration,
    /// Overrides the context-wide certificate verification setting.
    pub reject_unauthorized: Option<bool>,
}

impl Default for Http1Options {
    fn default() -> Self {
        let agent = AgentOptions::default();
        Self {
            keep_alive: agent.keep_alive,
            max_sockets: agent.max_sockets,
            max_free_sockets: agent.max_free_sockets,
            idle_timeout: agent.idle_timeout,
            reject_unauthorized: None,
        }
    }
}

impl Http1Options {
    fn agent_options(&self) -> AgentOptions {
        AgentOptions {
            keep_alive: self.keep_alive,
            max_sockets: self.max_sockets,
            max_free_sockets: self.max_free_sockets,
            idle_timeout: self.idle_timeout,
        }
    }
}

/// Configuration fixed at context creation.
#[derive(Clone)]
pub struct ContextOptions {
    /// Protocol preference order offered during ALPN.
    pub alpn_protocols: Vec<Protocol>,
    pub alpn_cache_ttl: Duration,
    pub alpn_cache_size: usize,
    /// Response cache byte budget. Zero disables caching.
    pub max_cache_size: usize,
    /// Response cache entry budget. Zero disables caching.
    pub max_cache_entries: usize,
    pub user_agent: String,
    /// Verify server certificates.
    pub reject_unauthorized: bool,
    pub h1: Http1Options,
    pub h2: Http2Options,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            alpn_protocols: vec![Protocol::Http2, Protocol::Http11],
            alpn_cache_ttl: Duration::from_secs(60 * 60),
            alpn_cache_size: 200,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            max_cache_entries: DEFAULT_MAX_CACHE_ENTRIES,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            reject_unauthorized: true,
            h1: Http1Options::default(),
            h2: Http2Options::default(),
        }
    }
}

impl std::fmt::Debug for ContextOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextOptions")
            .field("alpn_protocols", &self.alpn_protocols)
            .field("alpn_cache_ttl", &self.alpn_cache_ttl)
            .field("alpn_cache_size", &self.alpn_cache_size)
            .field("max_cache_size", &self.max_cache_size)
            .field("max_cache_entries", &self.max_cache_entries)
            .field("user_agent", &self.user_agent)
            .field("reject_unauthorized", &self.reject_unauthorized)
            .field("h1", &self.h1)
            .field("h2", &self.h2)
            .finish()
    }
}

impl ContextOptions {
    /// Caching disabled.
    pub fn no_cache() -> Self {
        Self {
            max_cache_size: 0,
            ..Self::default()
        }
    }

    /// HTTP/1.1 only.
    pub fn h1() -> Self {
        Self {
            alpn_protocols: vec![Protocol::Http11],
            ..Self::default()
        }
    }

    /// HTTP/1.x connections kept alive and reused.
    pub fn keep_alive() -> Self {
        let mut options = Self::default();
        options.h1.keep_alive = true;
        options
    }

    pub fn h1_no_cache() -> Self {
        Self {
            max_cache_size: 0,
            ..Self::h1()
        }
    }

    pub fn keep_alive_no_cache() -> Self {
        Self {
            max_cache_size: 0,
            ..Self::keep_alive()
        }
    }

    pub fn validate(&self) -> Result<(), NetError> {
        if self.alpn_protocols.is_empty() {
            return Err(NetError::InvalidArgument(
                "alpn_protocols must not be empty".to_string(),
            ));
        }
        if self.alpn_cache_size == 0 {
            return Err(NetError::InvalidArgument(
                "alpn_cache_size must be positive".to_string(),
            ));
        }
        if self.h1.max_sockets == Some(0) {
            return Err(NetError::InvalidArgument(
                "h1.max_sockets must be positive".to_string(),
            ));
        }
        if self.h2.idle_session_timeout.is_zero() {
            return Err(NetError::InvalidArgument(
                "h2.idle_session_timeout must be positive".to_string(),
            ));
        }
        if self.h2.pushed_stream_idle_timeout.is_zero() {
            return Err(NetError::InvalidArgument(
                "h2.pushed_stream_idle_timeout must be positive".to_string(),
            ));
        }
        HeaderValue::from_str(&self.user_agent)
            .map_err(|_| {
                NetError::InvalidArgument("user_agent is not a valid header value".to_string())
            })?;
        Ok(())
    }
}

/// Network state for one client.
pub struct RequestContext {
    options: ContextOptions,
    user_agent: HeaderValue,
    alpn: Arc<AlpnNegotiator>,
    h1: Http1Driver,
    h2: Http2Driver,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("options", &self.options)
            .field("alpn", &self.alpn)
            .field("h1", &self.h1)
            .field("h2", &self.h2)
            .finish()
    }
}

impl RequestContext {
    /// Build a context. Pushed responses go to `sink`.
    pub fn new(options: ContextOptions, sink: Arc<dyn PushSink>) -> Result<Self, NetError> {
        options.validate()?;
        let user_agent = HeaderValue::from_str(&options.user_agent)
            .map_err(|_| NetError::InvalidArgument("invalid user_agent".to_string()))?;

        let alpn = Arc::new(AlpnNegotiator::new(
            options.alpn_protocols.clone(),
            options.reject_unauthorized,
            options.alpn_cache_size,
            options.alpn_cache_ttl,
        ));
        let h1 = Http1Driver::new(
            options.h1.agent_options(),
            options.h1.reject_unauthorized.unwrap_or(options.reject_unauthorized),
        );
        let h2 = Http2Driver::new(
            options.h2.clone(),
            options.h2.reject_unauthorized.unwrap_or(options.reject_unauthorized),
            alpn.clone(),
            sink,
        );

        Ok(Self {
            options,
            user_agent,
            alpn,
            h1,
            h2,
        })
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    fn driver(&self, protocol: Protocol) -> &dyn ProtocolDriver {
        if protocol.is_http2() {
            &self.h2
        } else {
            &self.h1
        }
    }

    /// Send one hop: negotiate the protocol for `url` and dispatch to its driver.
    pub async fn request(
        &self,
        url: &Url,
        mut request: DriverRequest,
    ) -> Result<HttpResponse, NetError> {
        if !request.headers.contains_key(USER_AGENT) {
            request.headers.insert(USER_AGENT, self.user_agent.clone());
        }

        let negotiated = self
            .alpn
            .determine_protocol(url, request.signal.as_ref())
            .await?;
        tracing::trace!(
            url = %url,
            protocol = %negotiated.protocol,
            handed_socket = negotiated.socket.is_some(),
            "Dispatching request"
        );

        self.driver(negotiated.protocol)
            .request(url, negotiated.protocol, request, negotiated.socket)
            .await
    }

    /// Number of TLS ALPN probes performed.
    pub fn alpn_probe_count(&self) -> usize {
        self.alpn.probe_count()
    }

    /// Cached protocol decision for `origin`.
    pub fn cached_protocol(&self, origin: &str) -> Option<Protocol> {
        self.alpn.cached(origin)
    }

    /// Number of open HTTP/2 sessions.
    pub fn h2_session_count(&self) -> usize {
        self.h2.session_count()
    }

    /// Idle HTTP/1 connections held by the agent.
    pub fn h1_idle_count(&self) -> usize {
        self.h1.idle_count()
    }

    /// Tear down cached sessions, idle connections and ALPN decisions.
    pub fn reset(&self) {
        tracing::debug!("Resetting request context");
        self.alpn.reset();
        self.h1.reset();
        self.h2.reset();
    }
}
