//! RFC 7234 freshness rules for a private cache.
//!
//! A [`CachePolicy`] is computed once per stored response from the request
//! and response headers. It answers three questions: may the response be
//! stored, for how long is it fresh, and can a later request be answered
//! from it without contacting the origin.

use http::header::{
    AGE, CACHE_CONTROL, CONNECTION, DATE, EXPIRES, LAST_MODIFIED, PRAGMA, VARY,
};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::time::{Duration, SystemTime};
use url::Url;

/// Statuses the cache knows how to handle. Partial content is not among them.
const UNDERSTOOD_STATUSES: &[u16] = &[
    200, 203, 204, 300, 301, 302, 303, 307, 308, 404, 405, 410, 414, 501,
];

/// Statuses storable without explicit freshness information.
const CACHEABLE_BY_DEFAULT: &[u16] = &[200, 203, 204, 300, 301, 308, 404, 405, 410, 414, 501];

/// Hop-by-hop headers never replayed from the cache.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Freshness floor for `immutable` responses.
const IMMUTABLE_MIN_TTL: f64 = 24.0 * 3600.0;

/// Fraction of the Last-Modified age used as heuristic freshness.
const HEURISTIC_FRACTION: f64 = 0.1;

/// Largest delta-seconds value honoured; bigger values are clamped (RFC 7234 1.2.1).
pub const DELTA_SECONDS_MAX: u64 = 1 << 31;

/// Parse a delta-seconds argument, clamping overflow to [`DELTA_SECONDS_MAX`].
fn delta_seconds(arg: &str) -> Option<u64> {
    if arg.is_empty() || !arg.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(arg.parse::<u64>().map_or(DELTA_SECONDS_MAX, |n| n.min(DELTA_SECONDS_MAX)))
}

/// Parsed Cache-Control directives.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub must_revalidate: bool,
    pub public: bool,
    pub private: bool,
    pub immutable: bool,
    pub max_age: Option<u64>,
    pub min_fresh: Option<u64>,
    /// `Some(None)` is a bare `max-stale`: any staleness is acceptable.
    pub max_stale: Option<Option<u64>>,
}

impl CacheControl {
    /// Parse every `Cache-Control` header in `headers`.
    pub fn parse(headers: &HeaderMap) -> Self {
        let mut cc = CacheControl::default();
        for value in headers.get_all(CACHE_CONTROL) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            for directive in value.split(',') {
                let directive = directive.trim();
                if directive.is_empty() {
                    continue;
                }
                let (name, arg) = match directive.split_once('=') {
                    Some((name, arg)) => (name.trim(), Some(arg.trim().trim_matches('"'))),
                    None => (directive, None),
                };
                let seconds = arg.and_then(delta_seconds);
                match name.to_ascii_lowercase().as_str() {
                    "no-store" => cc.no_store = true,
                    "no-cache" => cc.no_cache = true,
                    "must-revalidate" => cc.must_revalidate = true,
                    "public" => cc.public = true,
                    "private" => cc.private = true,
                    "immutable" => cc.immutable = true,
                    "max-age" => cc.max_age = seconds,
                    "min-fresh" => cc.min_fresh = seconds,
                    "max-stale" => cc.max_stale = Some(seconds),
                    _ => {}
                }
            }
        }
        cc
    }
}

/// The request side of a cache lookup or store.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

impl CacheRequest {
    pub fn new(method: Method, url: Url, headers: HeaderMap) -> Self {
        Self {
            method,
            url,
            headers,
        }
    }

    /// Cache key: the URL without its fragment.
    pub fn key(&self) -> String {
        cache_key(&self.url)
    }
}

pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn http_date(headers: &HeaderMap, name: &HeaderName) -> Option<SystemTime> {
    httpdate::parse_http_date(header_str(headers, name)?).ok()
}

/// Signed difference `a - b` in seconds.
fn seconds_between(a: SystemTime, b: SystemTime) -> f64 {
    match a.duration_since(b) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

#[derive(Debug, Clone)]
pub struct CachePolicy {
    method: Method,
    key: String,
    status: StatusCode,
    request_headers: HeaderMap,
    response_headers: HeaderMap,
    request_cc: CacheControl,
    response_cc: CacheControl,
    response_time: SystemTime,
}

impl CachePolicy {
    pub fn new(request: &CacheRequest, status: StatusCode, response_headers: &HeaderMap) -> Self {
        Self::at(request, status, response_headers, SystemTime::now())
    }

    /// Policy for a response received at `response_time`.
    pub fn at(
        request: &CacheRequest,
        status: StatusCode,
        response_headers: &HeaderMap,
        response_time: SystemTime,
    ) -> Self {
        let mut request_cc = CacheControl::parse(&request.headers);
        // HTTP/1.0 fallback: Pragma only counts when Cache-Control is absent.
        if !request.headers.contains_key(CACHE_CONTROL)
            && header_str(&request.headers, &PRAGMA).is_some_and(|p| p.contains("no-cache"))
        {
            request_cc.no_cache = true;
        }

        Self {
            method: request.method.clone(),
            key: request.key(),
            status,
            request_headers: request.headers.clone(),
            response_headers: response_headers.clone(),
            request_cc,
            response_cc: CacheControl::parse(response_headers),
            response_time,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn has_explicit_expiration(&self) -> bool {
        self.response_cc.max_age.is_some() || self.response_headers.contains_key(EXPIRES)
    }

    /// Whether the response may be kept at all.
    pub fn is_storable(&self) -> bool {
        !self.request_cc.no_store
            && (self.method == Method::GET || self.method == Method::HEAD)
            && UNDERSTOOD_STATUSES.contains(&self.status.as_u16())
            && !self.response_cc.no_store
            && (self.has_explicit_expiration()
                || self.response_cc.public
                || CACHEABLE_BY_DEFAULT.contains(&self.status.as_u16()))
    }

    fn server_date(&self) -> SystemTime {
        http_date(&self.response_headers, &DATE).unwrap_or(self.response_time)
    }

    /// Age of the response in seconds, as of `now`.
    pub fn age_at(&self, now: SystemTime) -> f64 {
        let initial = header_str(&self.response_headers, &AGE)
            .and_then(|a| delta_seconds(a.trim()))
            .unwrap_or(0) as f64;
        initial + seconds_between(now, self.response_time).max(0.0)
    }

    pub fn age(&self) -> f64 {
        self.age_at(SystemTime::now())
    }

    /// Freshness lifetime in seconds, at most [`DELTA_SECONDS_MAX`].
    pub fn max_age(&self) -> f64 {
        self.freshness_lifetime().min(DELTA_SECONDS_MAX as f64)
    }

    fn freshness_lifetime(&self) -> f64 {
        if !self.is_storable() || self.response_cc.no_cache {
            return 0.0;
        }
        if header_str(&self.response_headers, &VARY).is_some_and(|v| v.trim() == "*") {
            return 0.0;
        }
        if let Some(max_age) = self.response_cc.max_age {
            return max_age as f64;
        }

        let floor = if self.response_cc.immutable {
            IMMUTABLE_MIN_TTL
        } else {
            0.0
        };
        let server_date = self.server_date();

        if self.response_headers.contains_key(EXPIRES) {
            return match http_date(&self.response_headers, &EXPIRES) {
                Some(expires) if expires >= server_date => {
                    floor.max(seconds_between(expires, server_date))
                }
                // Invalid or past Expires means already stale.
                _ => 0.0,
            };
        }

        if let Some(last_modified) = http_date(&self.response_headers, &LAST_MODIFIED) {
            let since = seconds_between(server_date, last_modified);
            if since > 0.0 {
                return floor.max(since * HEURISTIC_FRACTION);
            }
        }

        floor
    }

    pub fn time_to_live_at(&self, now: SystemTime) -> Duration {
        let remaining = self.max_age() - self.age_at(now);
        if remaining > 0.0 {
            Duration::try_from_secs_f64(remaining).unwrap_or(Duration::from_secs(DELTA_SECONDS_MAX))
        } else {
            Duration::ZERO
        }
    }

    /// Remaining freshness.
    pub fn time_to_live(&self) -> Duration {
        self.time_to_live_at(SystemTime::now())
    }


    fn request_matches(&self, request: &CacheRequest) -> bool {
        self.key == request.key()
            && (self.method == request.method
                || (request.method == Method::HEAD && self.method == Method::GET))
            && self.vary_matches(request)
    }

    fn vary_matches(&self, request: &CacheRequest) -> bool {
        let Some(vary) = header_str(&self.response_headers, &VARY) else {
            return true;
        };
        if vary.trim() == "*" {
            return false;
        }
        vary.split(',')
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .all(|name| {
                let stored = self.request_headers.get_all(name.as_str()).iter();
                let incoming = request.headers.get_all(name.as_str()).iter();
                stored.eq(incoming)
            })
    }

    /// Whether `request` can be answered from this response as of `now`.
    pub fn satisfies_without_revalidation_at(
        &self,
        request: &CacheRequest,
        now: SystemTime,
    ) -> bool {
        let mut request_cc = CacheControl::parse(&request.headers);
        if !request.headers.contains_key(CACHE_CONTROL)
            && header_str(&request.headers, &PRAGMA).is_some_and(|p| p.contains("no-cache"))
        {
            request_cc.no_cache = true;
        }
        if request_cc.no_cache {
            return false;
        }

        let age = self.age_at(now);
        let max_age = self.max_age();

        if let Some(limit) = request_cc.max_age {
            if age > limit as f64 {
                return false;
            }
        }
        if let Some(min_fresh) = request_cc.min_fresh {
            if max_age - age < min_fresh as f64 {
                return false;
            }
        }
        if max_age <= age {
            let allows_stale = match request_cc.max_stale {
                Some(limit) if !self.response_cc.must_revalidate => {
                    limit.map_or(true, |limit| limit as f64 > age - max_age)
                }
                _ => false,
            };
            if !allows_stale {
                return false;
            }
        }

        self.request_matches(request)
    }

    pub fn satisfies_without_revalidation(&self, request: &CacheRequest) -> bool {
        self.satisfies_without_revalidation_at(request, SystemTime::now())
    }

    /// Method, URL and Vary check only; freshness is ignored.
    pub fn matches_ignoring_freshness(&self, request: &CacheRequest) -> bool {
        self.request_matches(request)
    }

    /// Headers to serve with a cached copy, as of `now`.
    ///
    /// Hop-by-hop headers are removed and `age` and `date` are refreshed.
    pub fn response_headers_at(&self, now: SystemTime) -> HeaderMap {
        let listed: Vec<String> = self
            .response_headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|name| name.trim().to_ascii_lowercase())
            .collect();

        let mut headers = HeaderMap::with_capacity(self.response_headers.len() + 2);
        for (name, value) in &self.response_headers {
            let lower = name.as_str();
            if HOP_BY_HOP.contains(&lower) || listed.iter().any(|l| l == lower) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        let age = self.age_at(now).round() as u64;
        headers.insert(AGE, HeaderValue::from(age));
        if let Ok(date) = HeaderValue::from_str(&httpdate::fmt_http_date(now)) {
            headers.insert(DATE, date);
        }
        headers
    }

    pub fn response_headers(&self) -> HeaderMap {
        self.response_headers_at(SystemTime::now())
    }
}
