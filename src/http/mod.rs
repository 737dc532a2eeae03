//! HTTP protocol layer.
//!
//! - [`protocol`]: negotiated protocols and the driver interface
//! - [`h1`] / [`h2`]: the HTTP/1.x and HTTP/2 drivers
//! - [`push`]: HTTP/2 server push delivery
//! - [`cachepolicy`] / [`httpcache`]: RFC 7234 response caching
//! - [`requestbody`], [`response`], [`responsebody`], [`decoder`]: message bodies

pub mod cachepolicy;
pub mod decoder;
pub mod h1;
pub mod h2;
pub mod h2session;
pub mod httpcache;
pub mod protocol;
pub mod push;
pub mod requestbody;
pub mod response;
pub mod responsebody;

// Re-exports for convenience
pub use cachepolicy::{CachePolicy, CacheRequest};
pub use h2::Http2Options;
pub use httpcache::{CacheMode, CacheStats, HttpCache};
pub use protocol::Protocol;
pub use push::{PushEvent, PushHandler, PushPromiseHandler, PushRejector, PushSubscription};
pub use requestbody::RequestBody;
pub use response::HttpResponse;
pub use responsebody::ResponseBody;
