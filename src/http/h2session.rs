//! A cached HTTP/2 session for one origin.

use bytes::Bytes;
use h2::client::SendRequest;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug)]
struct SessionState {
    closed: AtomicBool,
    draining: AtomicBool,
    active_streams: AtomicUsize,
    responses: AtomicUsize,
    last_activity: Mutex<Instant>,
    shutdown: Notify,
}

/// Handle to a multiplexed HTTP/2 connection.
///
/// Clones share the same connection and bookkeeping.
#[derive(Clone)]
pub struct Http2Session {
    id: u64,
    origin: String,
    sender: SendRequest<Bytes>,
    state: Arc<SessionState>,
    push_enabled: bool,
}

impl std::fmt::Debug for Http2Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http2Session")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("closed", &self.is_closed())
            .field("draining", &self.is_draining())
            .field("active_streams", &self.active_streams())
            .field("push_enabled", &self.push_enabled)
            .finish()
    }
}

impl Http2Session {
    pub fn new(id: u64, origin: String, sender: SendRequest<Bytes>, push_enabled: bool) -> Self {
        Self {
            id,
            origin,
            sender,
            state: Arc::new(SessionState {
                closed: AtomicBool::new(false),
                draining: AtomicBool::new(false),
                active_streams: AtomicUsize::new(0),
                responses: AtomicUsize::new(0),
                last_activity: Mutex::new(Instant::now()),
                shutdown: Notify::new(),
            }),
            push_enabled,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn push_enabled(&self) -> bool {
        self.push_enabled
    }

    /// A sender for opening a new stream.
    pub fn sender(&self) -> SendRequest<Bytes> {
        self.sender.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    pub fn is_draining(&self) -> bool {
        self.state.draining.load(Ordering::SeqCst)
    }

    /// Whether new streams may be opened on this session.
    pub fn is_usable(&self) -> bool {
        !self.is_closed() && !self.is_draining()
    }

    /// Mark the session closed and stop its connection task.
    ///
    /// Streams still open on the connection fail.
    pub fn close(&self) {
        if self.state.shut() {
            tracing::debug!(origin = %self.origin, session = self.id, "Closing HTTP/2 session");
        }
    }

    /// Stop taking new streams and close once the open ones finish.
    pub fn drain(&self) {
        if self.state.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(
            origin = %self.origin,
            session = self.id,
            active_streams = self.active_streams(),
            "Draining HTTP/2 session"
        );
        if self.state.active_streams.load(Ordering::SeqCst) == 0 {
            self.close();
        }
    }

    /// Resolves once [`close`](Self::close) is called.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.state.shutdown.notified().await;
    }

    pub fn active_streams(&self) -> usize {
        self.state.active_streams.load(Ordering::SeqCst)
    }

    /// Number of responses received on this session.
    pub fn responses(&self) -> usize {
        self.state.responses.load(Ordering::Acquire)
    }

    pub fn record_response(&self) {
        self.state.responses.fetch_add(1, Ordering::AcqRel);
        self.touch();
    }

    fn idle_for(&self) -> Duration {
        self.state.last_activity.lock().elapsed()
    }

    fn touch(&self) {
        *self.state.last_activity.lock() = Instant::now();
    }

    /// Count a stream as active until the guard is dropped.
    pub fn stream_guard(&self) -> StreamGuard {
        self.state.active_streams.fetch_add(1, Ordering::SeqCst);
        self.touch();
        StreamGuard {
            state: self.state.clone(),
        }
    }

    /// Close the session once it has had no active stream for `timeout`.
    pub(crate) async fn idle_monitor(self, timeout: Duration) {
        loop {
            let idle = self.idle_for();
            if idle < timeout {
                tokio::time::sleep(timeout - idle).await;
            }
            if self.is_closed() {
                return;
            }
            if self.active_streams() == 0 && self.idle_for() >= timeout {
                tracing::debug!(origin = %self.origin, session = self.id, "HTTP/2 session idle");
                self.close();
                return;
            }
            if self.active_streams() > 0 {
                tokio::time::sleep(timeout).await;
            }
        }
    }
}

/// Marks a stream active on its session.
#[derive(Debug)]
pub struct StreamGuard {
    state: Arc<SessionState>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let previous = self.state.active_streams.fetch_sub(1, Ordering::SeqCst);
        *self.state.last_activity.lock() = Instant::now();
        if previous == 1 && self.state.draining.load(Ordering::SeqCst) {
            self.state.shut();
        }
    }
}

impl SessionState {
    /// Flip to closed and wake the connection task. True on the first call.
    fn shut(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shutdown.notify_one();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn session() -> Http2Session {
        let (client, server) = duplex(64 * 1024);
        tokio::spawn(async move {
            if let Ok(mut conn) = h2::server::handshake(server).await {
                while conn.accept().await.is_some() {}
            }
        });
        let (sender, conn) = h2::client::handshake(client).await.unwrap();
        tokio::spawn(async move {
            let _ = conn.await;
        });
        Http2Session::new(1, "http2://localhost:80".to_string(), sender, false)
    }

    #[tokio::test]
    async fn test_stream_guard_counts() {
        let s = session().await;
        assert_eq!(s.active_streams(), 0);
        let a = s.stream_guard();
        let b = s.clone().stream_guard();
        assert_eq!(s.active_streams(), 2);
        drop(a);
        drop(b);
        assert_eq!(s.active_streams(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let s = session().await;
        s.close();
        s.close();
        assert!(s.is_closed());
        s.closed().await;
    }

    #[tokio::test]
    async fn test_drain_waits_for_open_streams() {
        let s = session().await;
        let guard = s.stream_guard();
        s.drain();
        assert!(!s.is_usable());
        assert!(!s.is_closed());

        drop(guard);
        assert!(s.is_closed());
        s.closed().await;
    }

    #[tokio::test]
    async fn test_drain_idle_session_closes_at_once() {
        let s = session().await;
        s.drain();
        assert!(s.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_monitor_closes() {
        let s = session().await;
        let monitor = tokio::spawn(s.clone().idle_monitor(Duration::from_secs(5)));
        tokio::time::sleep(Duration::from_secs(6)).await;
        monitor.await.unwrap();
        assert!(s.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_monitor_waits_for_streams() {
        let s = session().await;
        let guard = s.stream_guard();
        let monitor = tokio::spawn(s.clone().idle_monitor(Duration::from_secs(5)));
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(!s.is_closed());
        drop(guard);
        tokio::time::sleep(Duration::from_secs(11)).await;
        monitor.await.unwrap();
        assert!(s.is_closed());
    }
}
