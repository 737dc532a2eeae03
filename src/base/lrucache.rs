//! Bounded LRU map with per-entry expiry.
//!
//! Backs both the ALPN decision cache and the HTTP response cache. Entries are
//! evicted least-recently-used first once either the item budget or the size
//! budget is exceeded, and lazily dropped when their TTL has passed.
//!
//! Not synchronized; owners wrap it in a lock.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Slot<V> {
    value: V,
    size: usize,
    expires_at: Option<Instant>,
    tick: u64,
}

impl<V> Slot<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

pub struct LruCache<K, V> {
    entries: HashMap<K, Slot<V>>,
    /// Recency order: tick -> key. Lowest tick is least recently used.
    order: BTreeMap<u64, K>,
    next_tick: u64,
    max_items: usize,
    max_size: usize,
    current_size: usize,
}

impl<K, V> std::fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("len", &self.entries.len())
            .field("max_items", &self.max_items)
            .field("max_size", &self.max_size)
            .field("current_size", &self.current_size)
            .finish()
    }
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// `max_items` and `max_size` of zero mean the cache holds nothing.
    pub fn new(max_items: usize, max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 0,
            max_items,
            max_size,
            current_size: 0,
        }
    }

    /// Count-bounded cache where every entry has size 1.
    pub fn with_capacity(max_items: usize) -> Self {
        Self::new(max_items, usize::MAX)
    }

    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Insert or replace. Returns false when the entry alone exceeds the size budget.
    pub fn insert(&mut self, key: K, value: V, size: usize, ttl: Option<Duration>) -> bool {
        self.remove(&key);
        if self.max_items == 0 || size > self.max_size {
            return false;
        }

        let tick = self.bump();
        self.order.insert(tick, key.clone());
        self.current_size += size;
        self.entries.insert(
            key,
            Slot {
                value,
                size,
                expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
                tick,
            },
        );

        self.evict_over_budget();
        true
    }

    /// Look up a live entry, marking it most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            self.remove(key);
            return None;
        }

        let tick = self.bump();
        let slot = self.entries.get_mut(key)?;
        if let Some(owned_key) = self.order.remove(&slot.tick) {
            self.order.insert(tick, owned_key);
        }
        slot.tick = tick;
        Some(&slot.value)
    }

    /// Look up without touching recency.
    #[cfg(test)]
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.entries.get(key)?;
        if slot.is_expired(Instant::now()) {
            return None;
        }
        Some(&slot.value)
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.tick);
        self.current_size -= slot.size;
        Some(slot.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.current_size = 0;
    }

    /// Drop every expired entry.
    pub fn purge_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.remove(&key);
        }
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Aggregate size of stored entries.
    pub fn size(&self) -> usize {
        self.current_size
    }

    fn evict_over_budget(&mut self) {
        while self.entries.len() > self.max_items || self.current_size > self.max_size {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            if let Some(slot) = self.entries.remove(&key) {
                self.current_size -= slot.size;
            }
        }
    }
}
