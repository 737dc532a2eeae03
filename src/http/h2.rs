//! HTTP/2 driver (`h2` over TLS and cleartext `h2c`).
//!
//! One session per origin is kept in the session cache and shared by every
//! request to that origin. Session setup is serialized through a
//! [`ConnectionLock`] so concurrent first requests end up on one connection.
//! Sessions close after a period without active streams, or when the peer
//! goes away; a session that fails before any response arrives with
//! PROTOCOL_ERROR or HTTP_1_1_REQUIRED drops the cached ALPN decision for
//! its origin.

use crate::base::abort::{with_abort, AbortSignal};
use crate::base::neterror::NetError;
use crate::http::decoder::ContentDecoder;
use crate::http::h2session::Http2Session;
use crate::http::protocol::{
    authority_of, origin_of, DriverRequest, Protocol, ProtocolDriver, H2C_SCHEME,
};
use crate::http::push::{PushHandler, PushPromiseHandler, PushRejector, PushSink};
use crate::http::requestbody::{BodyWrapper, RequestBody};
use crate::http::response::HttpResponse;
use crate::http::ResponseBody;
use crate::socket::alpn::AlpnNegotiator;
use crate::socket::client::NegotiatedSocket;
use crate::socket::connectjob::ConnectJob;
use crate::socket::lock::ConnectionLock;
use crate::socket::tls::TlsConfig;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use h2::client::{PushPromises, SendRequest};
use h2::{Reason, SendStream};
use http::header::{CONNECTION, HOST, TE, TRANSFER_ENCODING, UPGRADE};
use http::{HeaderMap, Method, Request, Version};
use http_body_util::BodyExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::{Position, Url};

/// Headers that are meaningless or forbidden on an HTTP/2 stream.
const CONNECTION_SPECIFIC: &[&str] = &["keep-alive", "proxy-connection"];

/// HTTP/2 behaviour for a context.
#[derive(Clone)]
pub struct Http2Options {
    /// Close a session after this long without active streams.
    pub idle_session_timeout: Duration,
    /// Advertise SETTINGS_ENABLE_PUSH.
    pub enable_push: bool,
    /// Give up on a pushed stream that sends nothing for this long.
    pub pushed_stream_idle_timeout: Duration,
    /// Sees every PUSH_PROMISE and may reject it.
    pub push_promise_handler: Option<PushPromiseHandler>,
    /// Receives every accepted pushed response.
    pub push_handler: Option<PushHandler>,
    /// Overrides the context-wide certificate verification setting.
    pub reject_unauthorized: Option<bool>,
}

impl Default for Http2Options {
    fn default() -> Self {
        Self {
            idle_session_timeout: Duration::from_secs(5 * 60),
            enable_push: true,
            pushed_stream_idle_timeout: Duration::from_secs(5),
            push_promise_handler: None,
            push_handler: None,
            reject_unauthorized: None,
        }
    }
}

impl std::fmt::Debug for Http2Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http2Options")
            .field("idle_session_timeout", &self.idle_session_timeout)
            .field("enable_push", &self.enable_push)
            .field("pushed_stream_idle_timeout", &self.pushed_stream_idle_timeout)
            .field("push_promise_handler", &self.push_promise_handler.is_some())
            .field("push_handler", &self.push_handler.is_some())
            .field("reject_unauthorized", &self.reject_unauthorized)
            .finish()
    }
}

/// Everything a push drain task needs, detached from the driver.
#[derive(Clone)]
struct PushContext {
    origin: String,
    base: Url,
    idle_timeout: Duration,
    sink: Arc<dyn PushSink>,
    promise_handler: Option<PushPromiseHandler>,
    push_handler: Option<PushHandler>,
}

pub struct Http2Driver {
    sessions: Arc<DashMap<String, Http2Session>>,
    lock: ConnectionLock<Http2Session>,
    alpn: Arc<AlpnNegotiator>,
    tls: TlsConfig,
    options: Http2Options,
    sink: Arc<dyn PushSink>,
    next_session_id: AtomicU64,
}

impl std::fmt::Debug for Http2Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http2Driver")
            .field("sessions", &self.sessions.len())
            .field("options", &self.options)
            .field("verify", &self.tls.verify)
            .finish()
    }
}

impl Http2Driver {
    pub fn new(
        options: Http2Options,
        verify: bool,
        alpn: Arc<AlpnNegotiator>,
        sink: Arc<dyn PushSink>,
    ) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            lock: ConnectionLock::new(),
            alpn,
            tls: TlsConfig::new(vec![Protocol::Http2], verify),
            options,
            sink,
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Number of cached sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// The live session for `origin`, if any.
    pub fn session(&self, origin: &str) -> Option<Http2Session> {
        let session = self.sessions.get(origin)?.clone();
        if !session.is_usable() {
            self.sessions.remove_if(origin, |_, s| s.id() == session.id());
            return None;
        }
        Some(session)
    }

    fn wants_push(&self) -> bool {
        self.options.enable_push && (self.options.push_handler.is_some() || self.sink.wants_push())
    }

    async fn session_for(
        &self,
        url: &Url,
        origin: &str,
        socket: Option<NegotiatedSocket>,
        signal: Option<&AbortSignal>,
    ) -> Result<Http2Session, NetError> {
        if let Some(session) = self.session(origin) {
            return Ok(session);
        }

        let (guard, handed) =
            with_abort(signal, async { Ok(self.lock.acquire(origin).await) }).await?;

        if let Some(session) = handed
            .filter(Http2Session::is_usable)
            .or_else(|| self.session(origin))
        {
            guard.release(Some(session.clone()));
            return Ok(session);
        }

        match with_abort(signal, self.open_session(url, origin, socket)).await {
            Ok(session) => {
                self.sessions.insert(origin.to_string(), session.clone());
                guard.release(Some(session.clone()));
                Ok(session)
            }
            Err(e) => {
                guard.release(None);
                Err(e)
            }
        }
    }

    async fn open_session(
        &self,
        url: &Url,
        origin: &str,
        socket: Option<NegotiatedSocket>,
    ) -> Result<Http2Session, NetError> {
        let claimed = socket
            .filter(|s| s.verified() || !self.tls.verify)
            .and_then(|s| s.claim());
        let socket = match claimed {
            Some(socket) => socket,
            None => ConnectJob::connect(url, Some(&self.tls)).await?,
        };

        if socket.is_tls() && socket.selected_alpn() != Some(Protocol::Http2.alpn_id().as_bytes()) {
            tracing::debug!(origin, "Server did not select h2");
            self.alpn.evict(origin);
            return Err(NetError::Http11Required);
        }

        let push_enabled = self.wants_push();
        let (sender, connection) = h2::client::Builder::new()
            .enable_push(push_enabled)
            .handshake::<_, Bytes>(socket)
            .await
            .map_err(NetError::from)?;

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Http2Session::new(id, origin.to_string(), sender, push_enabled);
        tracing::debug!(origin, session = id, push_enabled, "Opened HTTP/2 session");

        let sessions = self.sessions.clone();
        let alpn = self.alpn.clone();
        let watched = session.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                result = connection => result,
                _ = watched.closed() => Ok(()),
            };
            watched.close();
            sessions.remove_if(watched.origin(), |_, s| s.id() == watched.id());

            if let Err(e) = result {
                tracing::warn!(
                    origin = %watched.origin(),
                    session = watched.id(),
                    error = %e,
                    "HTTP/2 session error"
                );
                let downgrade = matches!(
                    e.reason(),
                    Some(Reason::PROTOCOL_ERROR) | Some(Reason::HTTP_1_1_REQUIRED)
                );
                if downgrade && watched.responses() == 0 {
                    alpn.evict(watched.origin());
                }
            }
        });

        tokio::spawn(session.clone().idle_monitor(self.options.idle_session_timeout));
        Ok(session)
    }

    /// Turn the caller's headers into HTTP/2 request headers.
    fn build_request(
        url: &Url,
        method: &Method,
        mut headers: HeaderMap,
    ) -> Result<Request<()>, NetError> {
        headers.remove(HOST);
        headers.remove(TRANSFER_ENCODING);
        headers.remove(UPGRADE);
        if let Some(listed) = headers.remove(CONNECTION) {
            if let Ok(listed) = listed.to_str() {
                for name in listed.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                    headers.remove(name);
                }
            }
        }
        for name in CONNECTION_SPECIFIC {
            headers.remove(*name);
        }
        if headers
            .get(TE)
            .is_some_and(|te| !te.as_bytes().eq_ignore_ascii_case(b"trailers"))
        {
            headers.remove(TE);
        }

        let scheme = if url.scheme() == H2C_SCHEME { "http" } else { url.scheme() };
        let path = &url[Position::BeforePath..Position::AfterQuery];
        let path = if path.is_empty() { "/" } else { path };
        let uri = format!("{}://{}{}", scheme, authority_of(url)?, path);

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(uri)
            .version(Version::HTTP_2);
        if let Some(map) = builder.headers_mut() {
            *map = headers;
        }
        builder
            .body(())
            .map_err(|e| NetError::InvalidArgument(e.to_string()))
    }

    async fn send(
        &self,
        url: &Url,
        request: DriverRequest,
        socket: Option<NegotiatedSocket>,
    ) -> Result<HttpResponse, NetError> {
        let origin = origin_of(url)?;
        let DriverRequest {
            method,
            headers,
            body,
            signal,
            decode,
        } = request;

        let mut session = self.session_for(url, &origin, socket, signal.as_ref()).await?;
        if let Err(e) = Self::ready(session.sender(), signal.as_ref()).await {
            if e.is_abort() {
                return Err(e);
            }
            // The cached session went away under us; retry once on a new one.
            tracing::debug!(origin = %origin, error = %e, "HTTP/2 session unusable");
            session.close();
            self.sessions.remove_if(&origin, |_, s| s.id() == session.id());
            session = self.session_for(url, &origin, None, signal.as_ref()).await?;
        }
        self.send_on(session, url, &origin, method, headers, body, signal, decode)
            .await
    }

    async fn ready(
        sender: SendRequest<Bytes>,
        signal: Option<&AbortSignal>,
    ) -> Result<SendRequest<Bytes>, NetError> {
        with_abort(signal, async { sender.ready().await.map_err(NetError::from) }).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_on(
        &self,
        session: Http2Session,
        url: &Url,
        origin: &str,
        method: Method,
        headers: HeaderMap,
        body: RequestBody,
        signal: Option<AbortSignal>,
        decode: bool,
    ) -> Result<HttpResponse, NetError> {
        let guard = session.stream_guard();
        let mut sender = Self::ready(session.sender(), signal.as_ref()).await?;

        let wire = Self::build_request(url, &method, headers)?;
        let end_of_stream = body.is_empty();

        tracing::debug!(
            method = %method,
            url = %url,
            session = session.id(),
            "Sending HTTP/2 request"
        );

        let (mut response_future, mut stream) = sender
            .send_request(wire, end_of_stream)
            .map_err(NetError::from)?;

        if session.push_enabled() {
            let promises = response_future.push_promises();
            tokio::spawn(drain_pushes(
                promises,
                PushContext {
                    origin: origin.to_string(),
                    base: url.clone(),
                    idle_timeout: self.options.pushed_stream_idle_timeout,
                    sink: self.sink.clone(),
                    promise_handler: self.options.push_promise_handler.clone(),
                    push_handler: self.options.push_handler.clone(),
                },
            ));
        }

        let exchange = async {
            if !end_of_stream {
                write_body(&mut stream, body.into_body()).await?;
            }
            response_future.await.map_err(NetError::from)
        };

        let response = match with_abort(signal.as_ref(), exchange).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_abort() {
                    stream.send_reset(Reason::CANCEL);
                }
                if matches!(e, NetError::Http11Required) {
                    self.alpn.evict(origin);
                }
                return Err(e);
            }
        };
        session.record_response();

        let (parts, recv) = response.into_parts();
        tracing::debug!(status = %parts.status, url = %url, "HTTP/2 response headers");

        let decoder = ContentDecoder::for_response(&method, parts.status, &parts.headers, decode);
        let body = ResponseBody::h2(recv)
            .with_decoder(decoder)
            .with_signal(signal)
            .with_guard((guard, stream));
        Ok(HttpResponse::new(
            parts.status,
            Version::HTTP_2,
            parts.headers,
            url.clone(),
            body,
        ))
    }
}

/// Stream a request body within the peer's flow-control window.
async fn write_body(stream: &mut SendStream<Bytes>, mut body: BodyWrapper) -> Result<(), NetError> {
    while let Some(frame) = body.frame().await {
        let Ok(mut data) = frame?.into_data() else {
            continue;
        };
        while !data.is_empty() {
            stream.reserve_capacity(data.len());
            let granted = futures::future::poll_fn(|cx| stream.poll_capacity(cx))
                .await
                .ok_or(NetError::Http2StreamClosed)?
                .map_err(NetError::from)?;
            let chunk = data.split_to(granted.min(data.len()));
            stream.send_data(chunk, false).map_err(NetError::from)?;
        }
    }
    stream.send_data(Bytes::new(), true).map_err(NetError::from)
}

/// Handle every PUSH_PROMISE associated with one request.
async fn drain_pushes(mut promises: PushPromises, ctx: PushContext) {
    while let Some(next) = promises.push_promise().await {
        let promise = match next {
            Ok(promise) => promise,
            Err(e) => {
                tracing::debug!(origin = %ctx.origin, error = %e, "Push promise stream ended");
                return;
            }
        };
        let (request, pushed) = promise.into_parts();

        let Some(url) = pushed_url(&ctx.base, request.uri()) else {
            tracing::debug!(
                origin = %ctx.origin,
                uri = %request.uri(),
                "Refusing push for foreign authority"
            );
            continue;
        };
        let request_headers = request.headers().clone();

        let rejected = match &ctx.promise_handler {
            Some(handler) => {
                let rejector = PushRejector::new();
                handler(&url, &request_headers, &rejector);
                rejector.is_rejected()
            }
            None => false,
        };
        if rejected {
            tracing::trace!(url = %url, "Push rejected by handler");
            continue;
        }

        let ctx = ctx.clone();
        tokio::spawn(async move {
            match receive_push(pushed, &url, ctx.idle_timeout).await {
                Ok(response) => {
                    tracing::debug!(
                        url = %url,
                        status = %response.status(),
                        "Received pushed response"
                    );
                    ctx.sink.deliver(&ctx.origin, &url, &request_headers, &response);
                    if let Some(handler) = &ctx.push_handler {
                        handler(&url, &request_headers, response);
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Dropped pushed stream");
                }
            }
        });
    }
}

/// Resolve a promised request target against the pushing request's URL.
///
/// Pushes for another authority are refused.
fn pushed_url(base: &Url, uri: &http::Uri) -> Option<Url> {
    if let Some(authority) = uri.authority() {
        let expected = authority_of(base).ok()?;
        if !authority.as_str().eq_ignore_ascii_case(&expected) {
            return None;
        }
    }
    let path = uri.path_and_query().map_or("/", |p| p.as_str());
    base.join(path).ok()
}

/// Read a pushed response fully.
///
/// Waiting for the pushed headers is bounded by the session itself; once
/// they arrive, the body is abandoned after `idle` without a data frame.
async fn receive_push(
    pushed: h2::client::PushedResponseFuture,
    url: &Url,
    idle: Duration,
) -> Result<HttpResponse, NetError> {
    let response = pushed.await.map_err(NetError::from)?;
    let (parts, mut recv) = response.into_parts();

    let mut decoder =
        ContentDecoder::for_response(&Method::GET, parts.status, &parts.headers, true);
    let mut buf = BytesMut::new();
    loop {
        let next = tokio::time::timeout(idle, recv.data())
            .await
            .map_err(|_| NetError::ConnectionTimedOut)?;
        match next {
            None => break,
            Some(Ok(chunk)) => {
                let _ = recv.flow_control().release_capacity(chunk.len());
                match decoder.as_mut() {
                    Some(decoder) => buf.extend_from_slice(&decoder.decode(&chunk)?),
                    None => buf.extend_from_slice(&chunk),
                }
            }
            Some(Err(e)) => return Err(NetError::from(e)),
        }
    }
    if let Some(decoder) = decoder {
        buf.extend_from_slice(&decoder.finish()?);
    }

    Ok(HttpResponse::new(
        parts.status,
        Version::HTTP_2,
        parts.headers,
        url.clone(),
        ResponseBody::buffered(buf.freeze()),
    ))
}

impl ProtocolDriver for Http2Driver {
    fn request<'a>(
        &'a self,
        url: &'a Url,
        _protocol: Protocol,
        request: DriverRequest,
        socket: Option<NegotiatedSocket>,
    ) -> BoxFuture<'a, Result<HttpResponse, NetError>> {
        self.send(url, request, socket).boxed()
    }

    fn reset(&self) {
        for entry in self.sessions.iter() {
            entry.value().drain();
        }
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_build_request_strips_connection_headers() {
        let url = Url::parse("https://example.com/a?b=c").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("example.com"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, x-hop"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-hop", HeaderValue::from_static("1"));
        headers.insert(TE, HeaderValue::from_static("gzip"));
        headers.insert("accept", HeaderValue::from_static("*/*"));

        let req = Http2Driver::build_request(&url, &Method::GET, headers).unwrap();
        assert_eq!(req.uri(), "https://example.com/a?b=c");
        assert!(req.headers().get(HOST).is_none());
        assert!(req.headers().get(CONNECTION).is_none());
        assert!(req.headers().get("keep-alive").is_none());
        assert!(req.headers().get("x-hop").is_none());
        assert!(req.headers().get(TE).is_none());
        assert_eq!(req.headers().get("accept").unwrap(), "*/*");
    }

    #[test]
    fn test_build_request_h2c_uses_http_scheme() {
        let url = Url::parse("http2://localhost:8080/x").unwrap();
        let req = Http2Driver::build_request(&url, &Method::POST, HeaderMap::new()).unwrap();
        assert_eq!(req.uri(), "http://localhost:8080/x");
        assert_eq!(req.method(), Method::POST);
    }

    #[test]
    fn test_pushed_url() {
        let base = Url::parse("https://example.com/index.html").unwrap();
        let same: http::Uri = "https://example.com/style.css".parse().unwrap();
        assert_eq!(
            pushed_url(&base, &same).unwrap().as_str(),
            "https://example.com/style.css"
        );
        let foreign: http::Uri = "https://evil.example/x".parse().unwrap();
        assert!(pushed_url(&base, &foreign).is_none());
    }

    #[test]
    fn test_default_options() {
        let options = Http2Options::default();
        assert_eq!(options.idle_session_timeout, Duration::from_secs(300));
        assert!(options.enable_push);
        assert_eq!(options.pushed_stream_idle_timeout, Duration::from_secs(5));
    }
}
