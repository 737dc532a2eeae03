//! HTTP Cache implementation.
//!
//! In-memory response cache keyed by URL (fragment stripped). Freshness
//! decisions come from [`CachePolicy`]; storage is a bounded LRU with both an
//! entry budget and a byte budget, and every entry expires once its
//! freshness lifetime has run out.
//!
//! Only fully buffered responses are stored, so a hit can be replayed any
//! number of times.

use crate::base::lrucache::LruCache;
use crate::base::neterror::NetError;
use crate::http::cachepolicy::{CachePolicy, CacheRequest};
use crate::http::response::HttpResponse;
use parking_lot::Mutex;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_CACHE_SIZE: usize = 50 * 1024 * 1024;
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 1000;

/// Per-request cache behavior, following the Fetch standard's request cache modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Serve fresh hits; store cacheable responses.
    #[default]
    Default,
    /// Bypass the cache for reads and writes.
    NoStore,
    /// Skip reads; store the new response.
    Reload,
    /// Skip reads (no revalidation support); store the new response.
    NoCache,
    /// Serve any stored match regardless of request directives.
    ForceCache,
    /// Serve a stored match or fail with [`NetError::CacheMiss`].
    OnlyIfCached,
}

impl CacheMode {
    /// Whether the cache is consulted before going to the network.
    pub fn reads(&self) -> bool {
        matches!(
            self,
            CacheMode::Default | CacheMode::ForceCache | CacheMode::OnlyIfCached
        )
    }

    /// Whether a network response may be stored.
    pub fn writes(&self) -> bool {
        !matches!(self, CacheMode::NoStore)
    }
}

impl FromStr for CacheMode {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(CacheMode::Default),
            "no-store" => Ok(CacheMode::NoStore),
            "reload" => Ok(CacheMode::Reload),
            "no-cache" => Ok(CacheMode::NoCache),
            "force-cache" => Ok(CacheMode::ForceCache),
            "only-if-cached" => Ok(CacheMode::OnlyIfCached),
            other => Err(NetError::InvalidArgument(format!(
                "unknown cache mode {:?}",
                other
            ))),
        }
    }
}

/// Aggregate cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Approximate bytes held.
    pub size: usize,
    /// Number of stored responses.
    pub count: usize,
}

struct CacheEntry {
    policy: CachePolicy,
    response: HttpResponse,
}

/// In-memory HTTP cache.
pub struct HttpCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    max_entries: usize,
    max_size_bytes: usize,
}

impl std::fmt::Debug for HttpCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCache")
            .field("max_entries", &self.max_entries)
            .field("max_size_bytes", &self.max_size_bytes)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for HttpCache {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpCache {
    /// Create a new cache with default limits.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_CACHE_ENTRIES, DEFAULT_MAX_CACHE_SIZE)
    }

    /// Create a cache with custom limits. Either limit at zero disables storage.
    pub fn with_limits(max_entries: usize, max_size_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(max_entries, max_size_bytes)),
            max_entries,
            max_size_bytes,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_entries > 0 && self.max_size_bytes > 0
    }

    /// Look up a stored response for `request`.
    ///
    /// Returns a fresh copy flagged as served from cache, with `age` and
    /// `date` rewritten.
    pub fn lookup(&self, request: &CacheRequest, mode: CacheMode) -> Option<HttpResponse> {
        if !self.is_enabled() || !mode.reads() {
            return None;
        }

        let mut entries = self.entries.lock();
        let entry = entries.get(&request.key())?;
        let usable = match mode {
            CacheMode::ForceCache | CacheMode::OnlyIfCached => {
                entry.policy.matches_ignoring_freshness(request)
            }
            _ => entry.policy.satisfies_without_revalidation(request),
        };
        if !usable {
            return None;
        }

        let mut response = entry.response.try_clone()?;
        response.set_headers(entry.policy.response_headers());
        response.set_from_cache(true);
        response.set_redirected(false);
        Some(response)
    }

    /// Policy and lifetime for `response`, if it may be stored at all.
    pub fn admit(
        &self,
        request: &CacheRequest,
        response: &HttpResponse,
    ) -> Option<(CachePolicy, Duration)> {
        if !self.is_enabled() {
            return None;
        }
        let policy = CachePolicy::new(request, response.status(), response.headers());
        if !policy.is_storable() {
            return None;
        }
        let ttl = policy.time_to_live();
        if ttl.is_zero() {
            return None;
        }
        Some((policy, ttl))
    }

    /// Store a buffered response under the key of `request`.
    pub fn insert(
        &self,
        request: &CacheRequest,
        policy: CachePolicy,
        ttl: Duration,
        response: &HttpResponse,
    ) -> bool {
        let Some(stored) = response.try_clone() else {
            return false;
        };
        let size = stored.approximate_size();
        let key = request.key();
        let inserted = self.entries.lock().insert(
            key.clone(),
            CacheEntry {
                policy,
                response: stored,
            },
            size,
            Some(ttl),
        );
        tracing::debug!(key = %key, size, ttl_secs = ttl.as_secs(), inserted, "Cache store");
        inserted
    }

    /// Store `response` if it is cacheable and hand it back to the caller.
    ///
    /// Cacheable responses are buffered first; everything else passes
    /// through untouched with its body still streaming.
    pub async fn store(
        &self,
        request: &CacheRequest,
        response: HttpResponse,
    ) -> Result<HttpResponse, NetError> {
        let Some((policy, ttl)) = self.admit(request, &response) else {
            return Ok(response);
        };
        let response = response.into_buffered().await?;
        self.insert(request, policy, ttl, &response);
        Ok(response)
    }

    /// Clear all cached entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let mut entries = self.entries.lock();
        entries.purge_expired();
        CacheStats {
            size: entries.size(),
            count: entries.len(),
        }
    }

    /// Get the number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
