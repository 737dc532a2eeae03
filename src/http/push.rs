//! HTTP/2 server push plumbing.
//!
//! Three parties observe pushed streams:
//! - an optional promise handler that sees each PUSH_PROMISE first and may
//!   reject it,
//! - an optional push handler that receives every accepted, fully buffered
//!   pushed response,
//! - a [`PushSink`] owned by the context (the response cache plus any
//!   subscribers registered through [`PushHub`]).

use crate::http::response::HttpResponse;
use http::HeaderMap;
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use url::Url;

/// Lets a promise handler refuse a pushed stream.
#[derive(Debug, Default)]
pub struct PushRejector {
    rejected: Cell<bool>,
}

impl PushRejector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the stream; it is reset with CANCEL.
    pub fn reject(&self) {
        self.rejected.set(true);
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected.get()
    }
}

/// Called for every PUSH_PROMISE with the promised URL and request headers.
pub type PushPromiseHandler = Arc<dyn Fn(&Url, &HeaderMap, &PushRejector) + Send + Sync>;

/// Called with each accepted pushed response.
pub type PushHandler = Arc<dyn Fn(&Url, &HeaderMap, HttpResponse) + Send + Sync>;

/// A pushed response, fully received.
#[derive(Debug)]
pub struct PushEvent {
    pub origin: String,
    pub url: Url,
    pub request_headers: HeaderMap,
    pub response: HttpResponse,
}

/// Destination for accepted pushed responses.
pub trait PushSink: Send + Sync {
    /// Whether anything would consume a pushed response right now.
    fn wants_push(&self) -> bool;

    /// Deliver a buffered pushed response.
    fn deliver(
        &self,
        origin: &str,
        url: &Url,
        request_headers: &HeaderMap,
        response: &HttpResponse,
    );
}

/// Broadcasts pushed responses to subscribers.
#[derive(Default)]
pub struct PushHub {
    subscribers: Mutex<Vec<(u64, mpsc::UnboundedSender<PushEvent>)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for PushHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushHub")
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

impl PushHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(self: &Arc<Self>) -> PushSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, tx));
        PushSubscription {
            id,
            rx,
            hub: Arc::downgrade(self),
        }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|(sub, _)| *sub != id);
    }

    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.lock().is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Send a copy of `response` to every live subscriber.
    pub fn publish(
        &self,
        origin: &str,
        url: &Url,
        request_headers: &HeaderMap,
        response: &HttpResponse,
    ) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(_, tx)| {
            let Some(copy) = response.try_clone() else {
                return true;
            };
            tx.send(PushEvent {
                origin: origin.to_string(),
                url: url.clone(),
                request_headers: request_headers.clone(),
                response: copy,
            })
            .is_ok()
        });
    }
}

/// Receiving end of a push subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct PushSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<PushEvent>,
    hub: Weak<PushHub>,
}

impl PushSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next pushed response. `None` once the context is gone.
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PushEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ResponseBody;
    use bytes::Bytes;
    use http::{StatusCode, Version};

    fn pushed() -> HttpResponse {
        HttpResponse::new(
            StatusCode::OK,
            Version::HTTP_2,
            HeaderMap::new(),
            Url::parse("https://example.com/style.css").unwrap(),
            ResponseBody::buffered(Bytes::from_static(b"body{}")),
        )
    }

    #[test]
    fn test_rejector() {
        let rejector = PushRejector::new();
        assert!(!rejector.is_rejected());
        rejector.reject();
        assert!(rejector.is_rejected());
    }

    #[tokio::test]
    async fn test_publish_to_subscribers() {
        let hub = Arc::new(PushHub::new());
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_ne!(a.id(), b.id());

        let url = Url::parse("https://example.com/style.css").unwrap();
        hub.publish("https://example.com:443", &url, &HeaderMap::new(), &pushed());

        let event = a.recv().await.unwrap();
        assert_eq!(event.url, url);
        assert_eq!(event.response.text().await.unwrap(), "body{}");
        assert!(b.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let hub = Arc::new(PushHub::new());
        let sub = hub.subscribe();
        assert!(hub.has_subscribers());
        drop(sub);
        assert!(!hub.has_subscribers());
    }
}
