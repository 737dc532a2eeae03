//! HTTP Response with body access.

use crate::base::neterror::NetError;
use crate::http::ResponseBody;
use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};
use url::Url;

/// Fixed per-entry bookkeeping charged on top of body and headers.
const SIZE_OVERHEAD: usize = 256;

/// HTTP Response with accessible body.
/// This is the user-facing response type that owns the body.
pub struct HttpResponse {
    status: StatusCode,
    status_text: String,
    version: Version,
    headers: HeaderMap,
    url: Url,
    redirected: bool,
    from_cache: bool,
    body: Option<ResponseBody>,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("url", &self.url.as_str())
            .field("redirected", &self.redirected)
            .field("from_cache", &self.from_cache)
            .field("headers", &self.headers)
            .finish()
    }
}

impl HttpResponse {
    pub fn new(
        status: StatusCode,
        version: Version,
        headers: HeaderMap,
        url: Url,
        body: ResponseBody,
    ) -> Self {
        Self {
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            version,
            headers,
            url,
            redirected: false,
            from_cache: false,
            body: Some(body),
        }
    }

    /// Replace the status text with the one sent by the server.
    pub fn with_status_text(mut self, text: Option<String>) -> Self {
        if let Some(text) = text {
            self.status_text = text;
        }
        self
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// True for 2xx statuses.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Get the HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Get a reference to the headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn set_headers(&mut self, headers: HeaderMap) {
        self.headers = headers;
    }

    /// URL of the last hop.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// True when at least one redirect was followed.
    pub fn redirected(&self) -> bool {
        self.redirected
    }

    pub(crate) fn set_redirected(&mut self, redirected: bool) {
        self.redirected = redirected;
    }

    /// True when served from the response cache.
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    pub(crate) fn set_from_cache(&mut self, from_cache: bool) {
        self.from_cache = from_cache;
    }

    /// Take the response body for consumption.
    /// Can only be called once - subsequent calls return None.
    pub fn take_body(&mut self) -> Option<ResponseBody> {
        self.body.take()
    }

    /// Whether the body sits fully in memory and can be shared.
    pub fn is_buffered(&self) -> bool {
        self.body.as_ref().is_some_and(ResponseBody::is_buffered)
    }

    /// Read the body into memory so the response can be cached and cloned.
    pub async fn into_buffered(mut self) -> Result<Self, NetError> {
        if self.is_buffered() {
            return Ok(self);
        }
        let body = self.body.take().ok_or(NetError::HttpBodyError)?;
        let bytes = body.bytes().await?;
        self.body = Some(ResponseBody::buffered(bytes));
        Ok(self)
    }

    /// Copy of a buffered response; the payload is shared, not copied.
    pub fn try_clone(&self) -> Option<Self> {
        let bytes = self.body.as_ref()?.as_buffered()?.clone();
        Some(Self {
            status: self.status,
            status_text: self.status_text.clone(),
            version: self.version,
            headers: self.headers.clone(),
            url: self.url.clone(),
            redirected: self.redirected,
            from_cache: self.from_cache,
            body: Some(ResponseBody::buffered(bytes)),
        })
    }

    /// Approximate memory footprint, used for cache size accounting.
    pub fn approximate_size(&self) -> usize {
        let body = self
            .body
            .as_ref()
            .and_then(ResponseBody::as_buffered)
            .map_or(0, Bytes::len);
        let headers: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.as_str().len() + value.len())
            .sum();
        body + headers + self.url.as_str().len() + SIZE_OVERHEAD
    }

    /// Convenience method to consume body as bytes.
    pub async fn bytes(mut self) -> Result<Bytes, NetError> {
        self.body.take().ok_or(NetError::HttpBodyError)?.bytes().await
    }

    /// Convenience method to consume body as text.
    pub async fn text(mut self) -> Result<String, NetError> {
        self.body.take().ok_or(NetError::HttpBodyError)?.text().await
    }

    /// Convenience method to consume body as JSON.
    #[cfg(feature = "json")]
    pub async fn json<T: serde::de::DeserializeOwned>(mut self) -> Result<T, NetError> {
        self.body.take().ok_or(NetError::HttpBodyError)?.json().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &'static [u8]) -> HttpResponse {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "text/plain".parse().unwrap());
        HttpResponse::new(
            StatusCode::OK,
            Version::HTTP_11,
            headers,
            Url::parse("http://example.com/a").unwrap(),
            ResponseBody::buffered(Bytes::from_static(body)),
        )
    }

    #[test]
    fn test_status_text() {
        let resp = response(b"");
        assert_eq!(resp.status_text(), "OK");
        let resp = resp.with_status_text(Some("Fine".to_string()));
        assert_eq!(resp.status_text(), "Fine");
        assert!(resp.ok());
    }

    #[tokio::test]
    async fn test_clone_shares_body() {
        let resp = response(b"payload");
        let copy = resp.try_clone().unwrap();
        assert_eq!(copy.text().await.unwrap(), "payload");
        assert_eq!(resp.text().await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_body_taken_once() {
        let mut resp = response(b"x");
        assert!(resp.take_body().is_some());
        assert!(resp.try_clone().is_none());
        assert!(matches!(resp.bytes().await, Err(NetError::HttpBodyError)));
    }

    #[test]
    fn test_approximate_size() {
        let resp = response(b"12345");
        let headers = "content-type".len() + "text/plain".len();
        let expected = 5 + headers + "http://example.com/a".len() + 256;
        assert_eq!(resp.approximate_size(), expected);
    }
}
