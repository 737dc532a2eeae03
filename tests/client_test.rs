//! Tests for the Client API over HTTP/1.x.

mod common;

use common::{response, serve};
use fetchnet::{Client, FetchOptions, NetError, RequestBody};
use flate2::write::GzEncoder;
use flate2::Compression;
use http::{Method, StatusCode, Version};
use std::io::Write;

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[tokio::test]
async fn test_simple_get() {
    let server = serve(|req| {
        let body = format!("{} {}", req.method, req.path);
        response("200 OK", &[("Content-Type", "text/plain")], body.as_bytes())
    })
    .await;

    let client = Client::no_cache().unwrap();
    let resp = client.get(server.url("/hello?x=1")).send().await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.status_text(), "OK");
    assert_eq!(resp.version(), Version::HTTP_11);
    assert!(!resp.redirected());
    assert!(!resp.from_cache());
    assert_eq!(resp.headers().get("content-type").unwrap(), "text/plain");
    assert_eq!(resp.text().await.unwrap(), "GET /hello?x=1");
}

#[tokio::test]
async fn test_custom_reason_phrase() {
    let server = serve(|_| response("299 Quite Fine", &[], b"")).await;
    let client = Client::no_cache().unwrap();
    let resp = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 299);
    assert_eq!(resp.status_text(), "Quite Fine");
}

#[tokio::test]
async fn test_default_headers() {
    let server = serve(|req| {
        let body = format!(
            "{}|{}|{}|{}",
            req.header("user-agent").unwrap_or(""),
            req.header("host").unwrap_or(""),
            req.header("accept-encoding").unwrap_or(""),
            req.header("connection").unwrap_or("")
        );
        response("200 OK", &[], body.as_bytes())
    })
    .await;

    let client = Client::no_cache().unwrap();
    let text = client.get(server.url("/")).send().await.unwrap().text().await.unwrap();
    let parts: Vec<&str> = text.split('|').collect();
    assert!(parts[0].starts_with("fetchnet/"));
    assert_eq!(parts[1], server.addr.to_string());
    assert_eq!(parts[2], "gzip, deflate, br");
    assert_eq!(parts[3], "close");

    let text = client
        .get(server.url("/"))
        .header("user-agent", "custom/1.0")
        .compress(false)
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let parts: Vec<&str> = text.split('|').collect();
    assert_eq!(parts[0], "custom/1.0");
    assert_eq!(parts[2], "");
}

#[tokio::test]
async fn test_post_body() {
    let server = serve(|req| {
        let mut body = req.method.clone().into_bytes();
        body.push(b':');
        body.extend_from_slice(&req.body);
        response("200 OK", &[], &body)
    })
    .await;

    let client = Client::no_cache().unwrap();
    let text = client
        .post(server.url("/echo"))
        .body("hello world")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(text, "POST:hello world");

    let chunks = futures::stream::iter(vec![
        Ok::<_, std::io::Error>(bytes::Bytes::from_static(b"stream")),
        Ok(bytes::Bytes::from_static(b"ed")),
    ]);
    let text = client
        .fetch(
            &server.url("/echo"),
            FetchOptions {
                method: Method::PUT,
                body: RequestBody::stream(chunks),
                ..FetchOptions::default()
            },
        )
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(text, "PUT:streamed");
}

#[tokio::test]
async fn test_json_roundtrip() {
    let server = serve(|req| {
        assert_eq!(req.header("content-type"), Some("application/json"));
        response("200 OK", &[("Content-Type", "application/json")], &req.body)
    })
    .await;

    let client = Client::no_cache().unwrap();
    let value: serde_json::Value = client
        .post(server.url("/json"))
        .json(&serde_json::json!({"name": "fetchnet", "n": 3}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(value["name"], "fetchnet");
    assert_eq!(value["n"], 3);
}

#[tokio::test]
async fn test_get_with_body_is_usage_error() {
    let client = Client::no_cache().unwrap();
    let err = client
        .get("http://127.0.0.1:9/")
        .body("nope")
        .send()
        .await
        .unwrap_err();
    assert!(err.is_usage_error());
}

#[tokio::test]
async fn test_unknown_scheme() {
    let client = Client::no_cache().unwrap();
    let err = client.get("ftp://127.0.0.1/").send().await.unwrap_err();
    assert!(matches!(err, NetError::UnknownUrlScheme(_)));
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = Client::no_cache().unwrap();
    let err = client.get(format!("http://{}/", addr)).send().await.unwrap_err();
    match err {
        NetError::ConnectionFailedTo { port, ref source, .. } => {
            assert_eq!(port, addr.port());
            assert_eq!(source.kind(), std::io::ErrorKind::ConnectionRefused);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_gzip_decoded() {
    let server = serve(|_| {
        response(
            "200 OK",
            &[("Content-Encoding", "gzip")],
            &gzip(b"compressed payload"),
        )
    })
    .await;

    let client = Client::no_cache().unwrap();
    let text = client.get(server.url("/")).send().await.unwrap().text().await.unwrap();
    assert_eq!(text, "compressed payload");

    let raw = client
        .get(server.url("/"))
        .decode(false)
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(raw.as_ref(), gzip(b"compressed payload").as_slice());
}

#[tokio::test]
async fn test_head_not_decoded() {
    let server = serve(|req| {
        assert_eq!(req.method, "HEAD");
        b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: 0\r\n\r\n".to_vec()
    })
    .await;

    let client = Client::no_cache().unwrap();
    let resp = client.head(server.url("/")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_without_keep_alive_each_request_connects() {
    let server = serve(|_| response("200 OK", &[], b"ok")).await;
    let client = Client::no_cache().unwrap();
    for _ in 0..3 {
        let resp = client.get(server.url("/")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "ok");
    }
    assert_eq!(server.connection_count(), 3);
    assert_eq!(client.h1_idle_count(), 0);
}

#[tokio::test]
async fn test_keep_alive_reuses_connection() {
    let server = serve(|_| response("200 OK", &[], b"ok")).await;
    let client = Client::keep_alive_no_cache().unwrap();
    for _ in 0..3 {
        let resp = client.get(server.url("/")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "ok");
    }
    assert_eq!(server.request_count(), 3);
    assert_eq!(server.connection_count(), 1);
    assert_eq!(client.h1_idle_count(), 1);

    client.reset();
    assert_eq!(client.h1_idle_count(), 0);
}

#[tokio::test]
async fn test_isolated_contexts() {
    let server = serve(|_| response("200 OK", &[], b"ok")).await;
    let parent = Client::keep_alive_no_cache().unwrap();
    let child = parent.context(fetchnet::ContextOptions::keep_alive_no_cache()).unwrap();

    parent.get(server.url("/")).send().await.unwrap().text().await.unwrap();
    child.get(server.url("/")).send().await.unwrap().text().await.unwrap();

    assert_eq!(server.connection_count(), 2);
    assert_eq!(parent.h1_idle_count(), 1);
    assert_eq!(child.h1_idle_count(), 1);
}
