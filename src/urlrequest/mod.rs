//! Fetch layer: request values, the per-client context and the fetch job.

pub mod context;
pub mod job;
pub mod request;

pub use context::{ContextOptions, Http1Options, Http2Options, RequestContext};
pub use job::{CachePushSink, FetchJob};
pub use request::{FetchOptions, RedirectMode, Request};
