//! Socket and connection management.
//!
//! - [`connectjob`]: DNS -> TCP -> TLS connection flow
//! - [`tls`]: TLS configuration with BoringSSL
//! - [`lock`]: per-origin lock that collapses concurrent connection setup
//! - [`alpn`]: per-origin protocol negotiation and its cache
//! - [`pool`]: HTTP/1.x keep-alive agent

pub mod alpn;
pub mod client;
pub mod connectjob;
pub mod lock;
pub mod pool;
pub mod tls;
