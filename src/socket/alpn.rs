//! Per-origin protocol negotiation.
//!
//! Decides which wire protocol a URL is served with. Plain `http` is always
//! HTTP/1.1 and the `http2` scheme is always h2c. For `https` the outcome of
//! a TLS handshake with ALPN is cached per origin, and concurrent first
//! requests to one origin share a single probe: the probe socket is handed to
//! whichever request gets to use it.

use crate::base::abort::{with_abort, AbortSignal};
use crate::base::lrucache::LruCache;
use crate::base::neterror::NetError;
use crate::http::protocol::{origin_of, Protocol, H2C_SCHEME};
use crate::socket::client::{NegotiatedSocket, SocketType};
use crate::socket::connectjob::ConnectJob;
use crate::socket::lock::ConnectionLock;
use crate::socket::tls::TlsConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

/// Bounded, expiring map of origin -> negotiated protocol.
#[derive(Debug)]
pub struct AlpnCache {
    entries: Mutex<LruCache<String, Protocol>>,
    ttl: Duration,
}

impl AlpnCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::with_capacity(max_entries)),
            ttl,
        }
    }

    pub fn get(&self, origin: &str) -> Option<Protocol> {
        self.entries.lock().get(origin).copied()
    }

    pub fn insert(&self, origin: &str, protocol: Protocol) {
        self.entries
            .lock()
            .insert(origin.to_string(), protocol, 1, Some(self.ttl));
    }

    pub fn evict(&self, origin: &str) -> Option<Protocol> {
        self.entries.lock().remove(origin)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of [`AlpnNegotiator::determine_protocol`].
#[derive(Debug)]
pub struct Negotiated {
    pub protocol: Protocol,
    /// Probe socket ready for reuse, when one was opened for this decision.
    pub socket: Option<NegotiatedSocket>,
}

impl Negotiated {
    fn fixed(protocol: Protocol) -> Self {
        Self {
            protocol,
            socket: None,
        }
    }
}

pub struct AlpnNegotiator {
    preferences: Vec<Protocol>,
    tls: TlsConfig,
    cache: AlpnCache,
    lock: ConnectionLock<NegotiatedSocket>,
    probes: AtomicUsize,
    next_socket_id: AtomicU64,
}

impl std::fmt::Debug for AlpnNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpnNegotiator")
            .field("preferences", &self.preferences)
            .field("cached", &self.cache.len())
            .field("probes", &self.probe_count())
            .finish()
    }
}

impl AlpnNegotiator {
    pub fn new(
        preferences: Vec<Protocol>,
        verify: bool,
        cache_size: usize,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            tls: TlsConfig::new(preferences.clone(), verify),
            preferences,
            cache: AlpnCache::new(cache_size, cache_ttl),
            lock: ConnectionLock::new(),
            probes: AtomicUsize::new(0),
            next_socket_id: AtomicU64::new(1),
        }
    }

    pub fn preferences(&self) -> &[Protocol] {
        &self.preferences
    }

    /// Whether probe sockets had their certificate verified.
    pub fn verifies(&self) -> bool {
        self.tls.verify
    }

    /// Number of TLS probes performed so far.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::Relaxed)
    }

    pub fn cached(&self, origin: &str) -> Option<Protocol> {
        self.cache.get(origin)
    }

    /// Forget the decision for `origin`, forcing a new probe next time.
    pub fn evict(&self, origin: &str) {
        if let Some(previous) = self.cache.evict(origin) {
            tracing::debug!(origin, protocol = %previous, "Evicted ALPN decision");
        }
    }

    pub fn reset(&self) {
        self.cache.clear();
    }

    /// Pick the protocol for `url`.
    pub async fn determine_protocol(
        &self,
        url: &Url,
        signal: Option<&AbortSignal>,
    ) -> Result<Negotiated, NetError> {
        match url.scheme() {
            "http" => return Ok(Negotiated::fixed(Protocol::Http11)),
            H2C_SCHEME => return Ok(Negotiated::fixed(Protocol::Http2Cleartext)),
            "https" => {}
            other => return Err(NetError::UnknownUrlScheme(other.to_string())),
        }

        // Only HTTP/1.x offered: nothing to negotiate.
        if self.preferences.iter().all(Protocol::is_http1) {
            let protocol = self
                .preferences
                .first()
                .copied()
                .unwrap_or(Protocol::Http11);
            return Ok(Negotiated::fixed(protocol));
        }

        let origin = origin_of(url)?;
        if let Some(protocol) = self.cache.get(&origin) {
            tracing::trace!(origin = %origin, protocol = %protocol, "ALPN cache hit");
            return Ok(Negotiated::fixed(protocol));
        }

        let (guard, handed) =
            with_abort(signal, async { Ok(self.lock.acquire(&origin).await) }).await?;

        // Someone else probed while we waited.
        if let Some(protocol) = self.cache.get(&origin) {
            let socket = handed.filter(|s| !s.is_claimed());
            guard.release(socket.clone());
            return Ok(Negotiated { protocol, socket });
        }
        drop(handed);

        match with_abort(signal, self.probe(url, &origin)).await {
            Ok((protocol, socket)) => {
                self.cache.insert(&origin, protocol);
                let id = self.next_socket_id.fetch_add(1, Ordering::Relaxed);
                let socket = NegotiatedSocket::new(id, protocol, self.tls.verify, socket);
                guard.release(Some(socket.clone()));
                Ok(Negotiated {
                    protocol,
                    socket: Some(socket),
                })
            }
            Err(e) => {
                tracing::debug!(origin = %origin, error = %e, "ALPN probe failed");
                guard.release(None);
                Err(e)
            }
        }
    }

    async fn probe(&self, url: &Url, origin: &str) -> Result<(Protocol, SocketType), NetError> {
        self.probes.fetch_add(1, Ordering::Relaxed);
        let socket = ConnectJob::connect(url, Some(&self.tls)).await?;
        let protocol = Protocol::from_alpn(socket.selected_alpn())?;
        tracing::debug!(origin, protocol = %protocol, "ALPN negotiated");
        Ok((protocol, socket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiator(prefs: Vec<Protocol>) -> AlpnNegotiator {
        AlpnNegotiator::new(prefs, true, 16, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_plain_http_is_http11() {
        let n = negotiator(vec![Protocol::Http2, Protocol::Http11]);
        let url = Url::parse("http://example.com/").unwrap();
        let result = n.determine_protocol(&url, None).await.unwrap();
        assert_eq!(result.protocol, Protocol::Http11);
        assert!(result.socket.is_none());
        assert_eq!(n.probe_count(), 0);
    }

    #[tokio::test]
    async fn test_h2c_scheme() {
        let n = negotiator(vec![Protocol::Http11]);
        let url = Url::parse("http2://example.com/").unwrap();
        let result = n.determine_protocol(&url, None).await.unwrap();
        assert_eq!(result.protocol, Protocol::Http2Cleartext);
    }

    #[tokio::test]
    async fn test_unknown_scheme() {
        let n = negotiator(vec![Protocol::Http2]);
        let url = Url::parse("ftp://example.com/").unwrap();
        let err = n.determine_protocol(&url, None).await.unwrap_err();
        assert!(matches!(err, NetError::UnknownUrlScheme(ref s) if s == "ftp"));
    }

    #[tokio::test]
    async fn test_http1_only_preferences_skip_probe() {
        let n = negotiator(vec![Protocol::Http10, Protocol::Http11]);
        let url = Url::parse("https://example.invalid/").unwrap();
        let result = n.determine_protocol(&url, None).await.unwrap();
        assert_eq!(result.protocol, Protocol::Http10);
        assert_eq!(n.probe_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_probe() {
        let n = negotiator(vec![Protocol::Http2, Protocol::Http11]);
        n.cache.insert("https://example.invalid:443", Protocol::Http2);
        let url = Url::parse("https://example.invalid/x").unwrap();
        let result = n.determine_protocol(&url, None).await.unwrap();
        assert_eq!(result.protocol, Protocol::Http2);
        assert_eq!(n.probe_count(), 0);

        n.evict("https://example.invalid:443");
        assert!(n.cached("https://example.invalid:443").is_none());
    }

    #[tokio::test]
    async fn test_prefired_abort() {
        let n = negotiator(vec![Protocol::Http2, Protocol::Http11]);
        let controller = crate::base::abort::AbortController::new();
        controller.abort();
        let url = Url::parse("https://example.invalid/").unwrap();
        let err = n
            .determine_protocol(&url, Some(&controller.signal()))
            .await
            .unwrap_err();
        assert!(err.is_abort());
        assert_eq!(n.probe_count(), 0);
    }

    #[test]
    fn test_alpn_cache_ttl() {
        let cache = AlpnCache::new(4, Duration::ZERO);
        cache.insert("https://a:443", Protocol::Http2);
        assert!(cache.get("https://a:443").is_none());
    }
}
