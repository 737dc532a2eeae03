//! Per-key mutual exclusion with value handoff.
//!
//! Used to collapse concurrent connection setup for one origin into a single
//! attempt: the holder may pass what it built (a probe socket, an HTTP/2
//! session) to the next waiter on release.
//!
//! Waiters are served in FIFO order. A waiter that gave up (its `acquire`
//! future was dropped) is skipped. Dropping a [`LockGuard`] releases the key
//! with no value, so an aborted holder never strands the queue.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

type Handoff<V> = (LockGuard<V>, Option<V>);

struct LockState<V> {
    /// Present while the key is held; holds the queued waiters.
    held: Mutex<HashMap<String, VecDeque<oneshot::Sender<Handoff<V>>>>>,
}

/// Keyed async lock.
pub struct ConnectionLock<V> {
    state: Arc<LockState<V>>,
}

impl<V> Default for ConnectionLock<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for ConnectionLock<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLock")
            .field("held", &self.state.held.lock().len())
            .finish()
    }
}

impl<V> ConnectionLock<V> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(LockState {
                held: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Acquire `key`. Resolves immediately when free; otherwise waits for the
    /// current holder and yields whatever value it released.
    pub async fn acquire(&self, key: &str) -> (LockGuard<V>, Option<V>) {
        loop {
            let waiter = {
                let mut held = self.state.held.lock();
                match held.get_mut(key) {
                    None => {
                        held.insert(key.to_string(), VecDeque::new());
                        None
                    }
                    Some(waiters) => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push_back(tx);
                        Some(rx)
                    }
                }
            };

            let Some(rx) = waiter else {
                return (
                    LockGuard {
                        state: self.state.clone(),
                        key: key.to_string(),
                        released: false,
                    },
                    None,
                );
            };

            match rx.await {
                Ok(handoff) => return handoff,
                // Sender dropped without a handoff; contend again.
                Err(_) => continue,
            }
        }
    }

    /// Whether `key` currently has a holder.
    pub fn is_held(&self, key: &str) -> bool {
        self.state.held.lock().contains_key(key)
    }

    /// Number of callers queued behind the holder of `key`.
    pub fn waiters(&self, key: &str) -> usize {
        self.state.held.lock().get(key).map_or(0, VecDeque::len)
    }
}

/// Proof of holding a key in a [`ConnectionLock`].
pub struct LockGuard<V> {
    state: Arc<LockState<V>>,
    key: String,
    released: bool,
}

impl<V> LockGuard<V> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the key, handing `value` to the next waiter if there is one.
    pub fn release(mut self, value: Option<V>) {
        self.released = true;
        hand_off(&self.state, &self.key, value);
    }
}

impl<V> Drop for LockGuard<V> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            hand_off(&self.state, &self.key, None);
        }
    }
}

impl<V> fmt::Debug for LockGuard<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

fn hand_off<V>(state: &Arc<LockState<V>>, key: &str, mut value: Option<V>) {
    loop {
        let next = {
            let mut held = state.held.lock();
            let Some(waiters) = held.get_mut(key) else {
                return;
            };
            match waiters.pop_front() {
                Some(tx) => tx,
                None => {
                    held.remove(key);
                    return;
                }
            }
        };

        let guard = LockGuard {
            state: state.clone(),
            key: key.to_string(),
            released: false,
        };
        match next.send((guard, value)) {
            Ok(()) => return,
            Err((mut guard, returned)) => {
                // Waiter went away; pass ownership on to the next one.
                guard.released = true;
                value = returned;
            }
        }
    }
}
