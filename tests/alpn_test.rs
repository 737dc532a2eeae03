//! ALPN negotiation against local TLS servers with a self-signed certificate.

mod common;

use boring::asn1::Asn1Time;
use boring::bn::BigNum;
use boring::hash::MessageDigest;
use boring::pkey::{PKey, Private};
use boring::rsa::Rsa;
use boring::ssl::{select_next_proto, AlpnError, SslAcceptor, SslMethod};
use boring::x509::{X509NameBuilder, X509};
use bytes::Bytes;
use common::{response, serve_connection};
use fetchnet::{Client, NetError, Protocol};
use h2::Reason;
use http::{Response, StatusCode, Version};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const H1_ONLY: &[u8] = b"\x08http/1.1";
const H2_AND_H1: &[u8] = b"\x02h2\x08http/1.1";

fn self_signed() -> (X509, PKey<Private>) {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "localhost").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(1).unwrap()).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    (builder.build(), key)
}

fn acceptor(protocols: &'static [u8]) -> Arc<SslAcceptor> {
    let (cert, key) = self_signed();
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    builder.set_private_key(&key).unwrap();
    builder.set_certificate(&cert).unwrap();
    builder.set_alpn_select_callback(move |_, client| {
        select_next_proto(protocols, client).ok_or(AlpnError::NOACK)
    });
    Arc::new(builder.build())
}

struct TlsServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
}

impl TlsServer {
    fn url(&self, path: &str) -> String {
        format!("https://{}{}", self.addr, path)
    }

    fn origin(&self) -> String {
        format!("https://{}", self.addr)
    }
}

/// TLS server that only speaks HTTP/1.1.
async fn serve_tls_h1() -> TlsServer {
    let acceptor = acceptor(H1_ONLY);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(|req: common::RawRequest| {
        response("200 OK", &[], format!("h1 {}", req.path).as_bytes())
    });

    let conn_count = connections.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            conn_count.fetch_add(1, Ordering::SeqCst);
            let acceptor = acceptor.clone();
            let handler = handler.clone();
            let requests = requests.clone();
            tokio::spawn(async move {
                if let Ok(stream) = tokio_boring::accept(&acceptor, socket).await {
                    serve_connection(stream, handler, requests).await;
                }
            });
        }
    });

    TlsServer { addr, connections }
}

/// How a [`serve_tls_h2_with`] server treats the first stream it sees.
#[derive(Clone, Copy)]
enum FirstStream {
    Answer,
    Reset(Reason),
    GoAway(Reason),
}

/// TLS server that prefers HTTP/2.
async fn serve_tls_h2() -> TlsServer {
    serve_tls_h2_with(FirstStream::Answer).await
}

async fn serve_tls_h2_with(first: FirstStream) -> TlsServer {
    let acceptor = acceptor(H2_AND_H1);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(AtomicBool::new(false));

    let conn_count = connections.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            conn_count.fetch_add(1, Ordering::SeqCst);
            let acceptor = acceptor.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                let Ok(stream) = tokio_boring::accept(&acceptor, socket).await else {
                    return;
                };
                let Ok(mut conn) = h2::server::handshake(stream).await else {
                    return;
                };
                while let Some(Ok((request, mut respond))) = conn.accept().await {
                    let is_first = !seen.swap(true, Ordering::SeqCst);
                    match first {
                        FirstStream::Reset(reason) if is_first => {
                            respond.send_reset(reason);
                            continue;
                        }
                        FirstStream::GoAway(reason) if is_first => {
                            conn.abrupt_shutdown(reason);
                            continue;
                        }
                        _ => {}
                    }
                    let path = request.uri().path().to_string();
                    let response = Response::builder().status(StatusCode::OK).body(()).unwrap();
                    if let Ok(mut stream) = respond.send_response(response, false) {
                        let _ = stream.send_data(Bytes::from(format!("h2 {}", path)), true);
                    }
                }
            });
        }
    });

    TlsServer { addr, connections }
}

fn insecure_client() -> Client {
    Client::builder()
        .reject_unauthorized(false)
        .max_cache_size(0)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_h1_only_origin_probed_once() {
    let server = serve_tls_h1().await;
    let client = insecure_client();

    for path in ["/one", "/two"] {
        let resp = client.get(server.url(path)).send().await.unwrap();
        assert_eq!(resp.version(), Version::HTTP_11);
        assert_eq!(resp.text().await.unwrap(), format!("h1 {}", path));
    }
    assert_eq!(client.alpn_probe_count(), 1);
    // The probe socket carried the first request, so no extra handshake.
    assert_eq!(server.connections.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_first_requests_share_probe() {
    let server = serve_tls_h1().await;
    let client = insecure_client();

    let requests = (0..5).map(|i| {
        let client = client.clone();
        let url = server.url(&format!("/{}", i));
        async move { client.get(url).send().await.unwrap().text().await.unwrap() }
    });
    let bodies = futures::future::join_all(requests).await;
    for (i, body) in bodies.iter().enumerate() {
        assert_eq!(body, &format!("h1 /{}", i));
    }
    assert_eq!(client.alpn_probe_count(), 1);
}

#[tokio::test]
async fn test_h2_negotiated() {
    let server = serve_tls_h2().await;
    let client = insecure_client();

    let resp = client.get(server.url("/negotiated")).send().await.unwrap();
    assert_eq!(resp.version(), Version::HTTP_2);
    assert_eq!(resp.text().await.unwrap(), "h2 /negotiated");

    let resp = client.get(server.url("/again")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "h2 /again");

    assert_eq!(client.alpn_probe_count(), 1);
    assert_eq!(client.cached_protocol(&server.origin()), Some(Protocol::Http2));
    assert_eq!(client.h2_session_count(), 1);
    assert_eq!(server.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_self_signed_rejected_by_default() {
    let server = serve_tls_h1().await;
    let client = Client::no_cache().unwrap();

    let err = client.get(server.url("/")).send().await.unwrap_err();
    assert!(!matches!(err, NetError::Aborted));
    assert!(!err.is_usage_error());
}

#[tokio::test]
async fn test_h1_preference_skips_probe() {
    let server = serve_tls_h1().await;
    let client = Client::builder()
        .reject_unauthorized(false)
        .alpn_protocols(vec![Protocol::Http11])
        .max_cache_size(0)
        .build()
        .unwrap();

    let resp = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "h1 /");
    assert_eq!(client.alpn_probe_count(), 0);
}

#[tokio::test]
async fn test_http11_required_reset_forgets_alpn() {
    let server = serve_tls_h2_with(FirstStream::Reset(Reason::HTTP_1_1_REQUIRED)).await;
    let client = insecure_client();

    let err = client.get(server.url("/first")).send().await.unwrap_err();
    assert!(matches!(err, NetError::Http11Required), "{:?}", err);
    assert_eq!(client.alpn_probe_count(), 1);
    assert_eq!(client.cached_protocol(&server.origin()), None);

    // The decision was dropped, so the next request negotiates again.
    let resp = client.get(server.url("/second")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "h2 /second");
    assert_eq!(client.alpn_probe_count(), 2);
}

#[tokio::test]
async fn test_protocol_error_goaway_before_response_forgets_alpn() {
    let server = serve_tls_h2_with(FirstStream::GoAway(Reason::PROTOCOL_ERROR)).await;
    let client = insecure_client();

    let err = client.get(server.url("/first")).send().await.unwrap_err();
    assert!(!err.is_abort());
    assert_eq!(client.alpn_probe_count(), 1);

    // The session watcher evicts once the connection has wound down.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.h2_session_count(), 0);
    assert_eq!(client.cached_protocol(&server.origin()), None);

    let resp = client.get(server.url("/second")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "h2 /second");
    assert_eq!(client.alpn_probe_count(), 2);
    assert_eq!(server.connections.load(Ordering::SeqCst), 2);
}
