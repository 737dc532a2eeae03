//! HTTP/1.x connection agent.
//!
//! Groups connections by origin. With keep-alive enabled, a connection whose
//! response body was fully consumed goes back to its group's idle list and
//! is reused by the next request to that origin; idle connections expire
//! after `idle_timeout`. Without keep-alive every request gets its own
//! connection, closed once the response is done.

use crate::base::neterror::NetError;
use crate::http::requestbody::BodyWrapper;
use crate::socket::client::SocketType;
use crate::socket::connectjob::ConnectJob;
use crate::socket::tls::TlsConfig;
use dashmap::DashMap;
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;
use url::Url;

/// Upper bound on waiting for a pooled connection to finish its previous exchange.
const READY_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub keep_alive: bool,
    /// Concurrent connections per origin. `None` is unbounded.
    pub max_sockets: Option<usize>,
    /// Idle connections kept per origin.
    pub max_free_sockets: usize,
    pub idle_timeout: Duration,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            keep_alive: false,
            max_sockets: None,
            max_free_sockets: 256,
            idle_timeout: Duration::from_secs(15),
        }
    }
}

struct IdleConnection {
    sender: SendRequest<BodyWrapper>,
    conn_task: AbortHandle,
    idle_since: Instant,
}

#[derive(Default)]
struct Group {
    idle: VecDeque<IdleConnection>,
}

pub struct Http1Agent {
    options: AgentOptions,
    tls: TlsConfig,
    groups: DashMap<String, Group>,
    limiters: DashMap<String, Arc<Semaphore>>,
}

impl std::fmt::Debug for Http1Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http1Agent")
            .field("options", &self.options)
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl Http1Agent {
    pub fn new(options: AgentOptions, tls: TlsConfig) -> Self {
        Self {
            options,
            tls,
            groups: DashMap::new(),
            limiters: DashMap::new(),
        }
    }

    fn limiter(&self, origin: &str) -> Option<Arc<Semaphore>> {
        let max = self.options.max_sockets?;
        Some(
            self.limiters
                .entry(origin.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(max.max(1))))
                .clone(),
        )
    }

    fn pop_idle(&self, origin: &str) -> Option<IdleConnection> {
        self.groups.get_mut(origin)?.idle.pop_back()
    }

    /// Get a connection to `origin`, preferring `socket` if one is handed in,
    /// then an idle pooled connection, then a fresh connect.
    pub async fn checkout(
        self: &Arc<Self>,
        url: &Url,
        origin: &str,
        socket: Option<SocketType>,
    ) -> Result<PooledConnection, NetError> {
        let permit = match self.limiter(origin) {
            Some(semaphore) => Some(
                semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| NetError::ConnectionFailed)?,
            ),
            None => None,
        };

        if socket.is_none() && self.options.keep_alive {
            while let Some(idle) = self.pop_idle(origin) {
                let IdleConnection {
                    mut sender,
                    conn_task,
                    idle_since,
                } = idle;
                if idle_since.elapsed() >= self.options.idle_timeout || sender.is_closed() {
                    conn_task.abort();
                    continue;
                }
                match tokio::time::timeout(READY_TIMEOUT, sender.ready()).await {
                    Ok(Ok(())) => {
                        tracing::trace!(origin, "Reusing idle HTTP/1 connection");
                        return Ok(PooledConnection {
                            sender: Some(sender),
                            conn_task: Some(conn_task),
                            origin: origin.to_string(),
                            agent: Arc::downgrade(self),
                            reused: true,
                            reusable: true,
                            _permit: permit,
                        });
                    }
                    _ => {
                        conn_task.abort();
                    }
                }
            }
        }

        let socket = match socket {
            Some(socket) => socket,
            None => ConnectJob::connect(url, Some(&self.tls)).await?,
        };
        let (sender, conn_task) = Self::handshake(socket, origin).await?;
        tracing::trace!(origin, keep_alive = self.options.keep_alive, "Opened HTTP/1 connection");

        Ok(PooledConnection {
            sender: Some(sender),
            conn_task: Some(conn_task),
            origin: origin.to_string(),
            agent: Arc::downgrade(self),
            reused: false,
            reusable: self.options.keep_alive,
            _permit: permit,
        })
    }

    async fn handshake(
        socket: SocketType,
        origin: &str,
    ) -> Result<(SendRequest<BodyWrapper>, AbortHandle), NetError> {
        let (sender, conn) = http1::Builder::new()
            .handshake::<_, BodyWrapper>(TokioIo::new(socket))
            .await
            .map_err(NetError::from)?;

        let origin = origin.to_string();
        let task = tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(origin = %origin, error = %e, "HTTP/1 connection error");
            }
        });
        Ok((sender, task.abort_handle()))
    }

    fn release(
        self: &Arc<Self>,
        origin: &str,
        sender: SendRequest<BodyWrapper>,
        conn_task: AbortHandle,
    ) {
        if !self.options.keep_alive || sender.is_closed() {
            conn_task.abort();
            return;
        }

        {
            let mut group = self.groups.entry(origin.to_string()).or_default();
            if group.idle.len() >= self.options.max_free_sockets {
                conn_task.abort();
                return;
            }
            group.idle.push_back(IdleConnection {
                sender,
                conn_task,
                idle_since: Instant::now(),
            });
        }

        let agent = Arc::downgrade(self);
        let idle_timeout = self.options.idle_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(idle_timeout).await;
            if let Some(agent) = agent.upgrade() {
                agent.cleanup_idle();
            }
        });
    }

    /// Close idle connections past their timeout or closed by the peer.
    pub fn cleanup_idle(&self) {
        let timeout = self.options.idle_timeout;
        for mut entry in self.groups.iter_mut() {
            entry.value_mut().idle.retain(|idle| {
                let keep = idle.idle_since.elapsed() < timeout && !idle.sender.is_closed();
                if !keep {
                    idle.conn_task.abort();
                }
                keep
            });
        }
        self.groups.retain(|_, group| !group.idle.is_empty());
    }

    /// Close every idle connection.
    pub fn clear(&self) {
        for entry in self.groups.iter() {
            for idle in &entry.value().idle {
                idle.conn_task.abort();
            }
        }
        self.groups.clear();
    }

    pub fn idle_count(&self) -> usize {
        self.groups.iter().map(|g| g.idle.len()).sum()
    }
}

/// A checked-out HTTP/1 connection.
///
/// Dropping it returns the connection to the agent when keep-alive is on and
/// the exchange completed; otherwise the connection is closed.
pub struct PooledConnection {
    sender: Option<SendRequest<BodyWrapper>>,
    conn_task: Option<AbortHandle>,
    origin: String,
    agent: Weak<Http1Agent>,
    reused: bool,
    reusable: bool,
    _permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    pub async fn send(
        &mut self,
        request: http::Request<BodyWrapper>,
    ) -> Result<http::Response<Incoming>, NetError> {
        let sender = self.sender.as_mut().ok_or(NetError::ConnectionClosed)?;
        sender.send_request(request).await.map_err(NetError::from)
    }

    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Close the connection instead of returning it to the pool.
    pub fn discard(&mut self) {
        self.reusable = false;
        if let Some(task) = &self.conn_task {
            task.abort();
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let (Some(sender), Some(conn_task)) = (self.sender.take(), self.conn_task.take()) else {
            return;
        };
        match self.agent.upgrade() {
            Some(agent) if self.reusable => agent.release(&self.origin, sender, conn_task),
            _ => conn_task.abort(),
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("origin", &self.origin)
            .field("reused", &self.reused)
            .field("reusable", &self.reusable)
            .finish()
    }
}
