//! Base types and error handling.
//!
//! Provides foundational types mirroring Chromium's `net/base/`:
//! - [`NetError`](neterror::NetError): Network error codes matching `net_error_list.h`
//! - [`AbortSignal`](abort::AbortSignal): One-way request cancellation
//! - [`LruCache`](lrucache::LruCache): Bounded LRU map with per-entry TTL

pub mod abort;
pub mod context;
pub mod lrucache;
pub mod neterror;
