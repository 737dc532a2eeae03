//! HTTP/1.0 and HTTP/1.1 driver.

use crate::base::abort::with_abort;
use crate::base::neterror::NetError;
use crate::http::decoder::ContentDecoder;
use crate::http::protocol::{authority_of, origin_of, DriverRequest, Protocol, ProtocolDriver};
use crate::http::response::HttpResponse;
use crate::http::ResponseBody;
use crate::socket::client::NegotiatedSocket;
use crate::socket::pool::{AgentOptions, Http1Agent};
use crate::socket::tls::TlsConfig;
use futures::future::BoxFuture;
use futures::FutureExt;
use http::header::{CONNECTION, HOST};
use http::{HeaderValue, Request};
use parking_lot::Mutex;
use std::sync::Arc;
use url::{Position, Url};

/// Drives HTTP/1.x requests through a connection agent that is created on
/// first use and dropped again by `reset()`.
pub struct Http1Driver {
    options: AgentOptions,
    tls: TlsConfig,
    agent: Mutex<Option<Arc<Http1Agent>>>,
}

impl std::fmt::Debug for Http1Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http1Driver")
            .field("options", &self.options)
            .field("verify", &self.tls.verify)
            .finish()
    }
}

impl Http1Driver {
    pub fn new(options: AgentOptions, verify: bool) -> Self {
        Self {
            options,
            tls: TlsConfig::new(vec![Protocol::Http11], verify),
            agent: Mutex::new(None),
        }
    }

    fn agent(&self) -> Arc<Http1Agent> {
        self.agent
            .lock()
            .get_or_insert_with(|| {
                tracing::trace!(keep_alive = self.options.keep_alive, "Creating HTTP/1 agent");
                Arc::new(Http1Agent::new(self.options.clone(), self.tls.clone()))
            })
            .clone()
    }

    /// Idle keep-alive connections held by the agent, if one exists.
    pub fn idle_count(&self) -> usize {
        self.agent.lock().as_ref().map_or(0, |agent| agent.idle_count())
    }

    /// Build the wire request: origin-form target, `Host`, connection handling.
    fn build_request(
        &self,
        url: &Url,
        protocol: Protocol,
        request: &mut DriverRequest,
    ) -> Result<Request<crate::http::requestbody::BodyWrapper>, NetError> {
        let mut headers = std::mem::take(&mut request.headers);
        if !headers.contains_key(HOST) {
            let host = HeaderValue::from_str(&authority_of(url)?)
                .map_err(|_| NetError::InvalidUrl)?;
            headers.insert(HOST, host);
        }
        if !self.options.keep_alive {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        } else if protocol == Protocol::Http10 && !headers.contains_key(CONNECTION) {
            headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        }

        let target = &url[Position::BeforePath..Position::AfterQuery];
        let target = if target.is_empty() { "/" } else { target };

        let body = std::mem::take(&mut request.body).into_body();
        let mut builder = Request::builder()
            .method(request.method.clone())
            .uri(target)
            .version(protocol.version());
        if let Some(map) = builder.headers_mut() {
            *map = headers;
        }
        builder
            .body(body)
            .map_err(|e| NetError::InvalidArgument(e.to_string()))
    }

    async fn send(
        &self,
        url: &Url,
        protocol: Protocol,
        mut request: DriverRequest,
        socket: Option<NegotiatedSocket>,
    ) -> Result<HttpResponse, NetError> {
        let origin = origin_of(url)?;
        let agent = self.agent();
        let signal = request.signal.clone();

        // A socket probed without verification is not good enough for a
        // driver that verifies.
        let claimed = socket
            .filter(|s| s.verified() || !self.tls.verify)
            .and_then(|s| s.claim());

        let mut conn = with_abort(signal.as_ref(), agent.checkout(url, &origin, claimed)).await?;
        let method = request.method.clone();
        let wire = self.build_request(url, protocol, &mut request)?;

        tracing::debug!(
            method = %method,
            url = %url,
            protocol = %protocol,
            reused = conn.is_reused(),
            "Sending HTTP/1 request"
        );

        let response = match with_abort(signal.as_ref(), conn.send(wire)).await {
            Ok(response) => response,
            Err(e) => {
                conn.discard();
                return Err(e);
            }
        };

        let (parts, incoming) = response.into_parts();
        let status_text = parts
            .extensions
            .get::<hyper::ext::ReasonPhrase>()
            .and_then(|reason| std::str::from_utf8(reason.as_bytes()).ok())
            .map(str::to_string);
        let decoder =
            ContentDecoder::for_response(&method, parts.status, &parts.headers, request.decode);

        tracing::debug!(status = %parts.status, url = %url, "HTTP/1 response headers");

        let body = ResponseBody::h1(incoming)
            .with_decoder(decoder)
            .with_signal(signal)
            .with_guard(conn);
        Ok(
            HttpResponse::new(parts.status, parts.version, parts.headers, url.clone(), body)
                .with_status_text(status_text),
        )
    }
}

impl ProtocolDriver for Http1Driver {
    fn request<'a>(
        &'a self,
        url: &'a Url,
        protocol: Protocol,
        request: DriverRequest,
        socket: Option<NegotiatedSocket>,
    ) -> BoxFuture<'a, Result<HttpResponse, NetError>> {
        self.send(url, protocol, request, socket).boxed()
    }

    fn reset(&self) {
        let previous = self.agent.lock().take();
        if let Some(agent) = previous {
            agent.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestBody;
    use http::{HeaderMap, Method};

    fn driver_request() -> DriverRequest {
        DriverRequest {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            signal: None,
            decode: true,
        }
    }

    #[test]
    fn test_agent_created_on_first_use() {
        let driver = Http1Driver::new(AgentOptions::default(), true);
        assert!(driver.agent.lock().is_none());
        assert_eq!(driver.idle_count(), 0);

        let agent = driver.agent();
        assert!(Arc::ptr_eq(&agent, &driver.agent()));

        driver.reset();
        assert!(driver.agent.lock().is_none());
        assert!(!Arc::ptr_eq(&agent, &driver.agent()));
    }

    #[test]
    fn test_build_request_adds_host_and_close() {
        let driver = Http1Driver::new(AgentOptions::default(), true);
        let url = Url::parse("http://example.com:8080/a/b?c=d#frag").unwrap();
        let mut req = driver_request();
        let wire = driver.build_request(&url, Protocol::Http11, &mut req).unwrap();

        assert_eq!(wire.uri(), "/a/b?c=d");
        assert_eq!(wire.headers().get(HOST).unwrap(), "example.com:8080");
        assert_eq!(wire.headers().get(CONNECTION).unwrap(), "close");
        assert_eq!(wire.version(), http::Version::HTTP_11);
    }

    #[test]
    fn test_build_request_http10_keep_alive() {
        let driver = Http1Driver::new(
            AgentOptions {
                keep_alive: true,
                ..AgentOptions::default()
            },
            true,
        );
        let url = Url::parse("http://example.com/").unwrap();
        let mut req = driver_request();
        let wire = driver.build_request(&url, Protocol::Http10, &mut req).unwrap();

        assert_eq!(wire.version(), http::Version::HTTP_10);
        assert_eq!(wire.headers().get(HOST).unwrap(), "example.com");
        assert_eq!(wire.headers().get(CONNECTION).unwrap(), "keep-alive");
    }

    #[test]
    fn test_build_request_keeps_explicit_host() {
        let driver = Http1Driver::new(AgentOptions::default(), true);
        let url = Url::parse("http://127.0.0.1/").unwrap();
        let mut req = driver_request();
        req.headers
            .insert(HOST, HeaderValue::from_static("virtual.example"));
        let wire = driver.build_request(&url, Protocol::Http11, &mut req).unwrap();
        assert_eq!(wire.headers().get(HOST).unwrap(), "virtual.example");
    }
}
