//! # fetchnet
//!
//! An HTTP client with per-origin protocol negotiation and an RFC 7234
//! response cache.
//!
//! `fetchnet` exposes a single `fetch` entry point that speaks HTTP/1.0,
//! HTTP/1.1 or HTTP/2 depending on what each origin negotiates over ALPN,
//! follows redirects, serves fresh responses from memory and accepts HTTP/2
//! server push.
//!
//! ## Features
//!
//! - **ALPN negotiation**: one TLS probe per origin, cached with a TTL; the
//!   probe socket is handed to the chosen driver instead of reconnecting
//! - **HTTP/1.x & HTTP/2**: keep-alive agents, multiplexed sessions, cleartext
//!   HTTP/2 through the `http2://` scheme
//! - **Response cache**: RFC 7234 freshness, LRU eviction with size accounting
//! - **Server push**: promise and push handlers, push subscriptions, pushed
//!   responses fill the cache
//! - **Cancellation**: abort signals and timeouts on every request
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fetchnet::{Client, FetchOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fetchnet::NetError> {
//!     let client = Client::new()?;
//!     let response = client.fetch("https://example.com", FetchOptions::default()).await?;
//!     println!("Status: {}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Errors, cancellation and the LRU store
//! - [`socket`] - Connecting, TLS, ALPN negotiation and HTTP/1 agents
//! - [`http`] - Protocol drivers, bodies, push and caching
//! - [`urlrequest`] - Request context, redirects and the fetch job
//! - [`client`] - Public client API and the default instance

pub mod base;
pub mod client;
pub mod http;
pub mod socket;
pub mod urlrequest;

pub use base::abort::{AbortController, AbortSignal};
pub use base::neterror::NetError;
pub use client::{create_url, fetch, global, init, Client, ClientBuilder, RequestBuilder};
pub use http::{
    CacheMode, CacheStats, HttpResponse, Protocol, PushEvent, PushRejector, PushSubscription,
    RequestBody, ResponseBody,
};
pub use urlrequest::{ContextOptions, FetchOptions, Http1Options, Http2Options, RedirectMode};
