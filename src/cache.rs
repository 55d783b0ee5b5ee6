use std::{
    borrow::Borrow,
    cmp::Ordering,
    hash::Hash,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use priority_queue::PriorityQueue;

pub trait ClearableCache: Send + Sync {
    fn clear(&self);
    fn len(&self) -> usize;
}

/// Bounded LRU cache with an optional per-entry TTL. Expired entries are
/// evicted lazily when they are read.
pub struct ResultCache<K: Hash + Eq, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    ttl: Option<Duration>,
    get_time: fn() -> Instant,
}

struct Inner<K: Hash + Eq, V> {
    cache: PriorityQueue<K, Slot<V>>,
    tick: u64,
}

impl<K: Hash + Eq, V: Clone> ResultCache<K, V> {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self::with_clock(capacity, ttl, Instant::now)
    }

    pub fn with_clock(capacity: usize, ttl: Option<Duration>, get_time: fn() -> Instant) -> Self {
        Self {
            inner: Mutex::new(Inner {
                cache: PriorityQueue::new(),
                tick: 0,
            }),
            capacity,
            ttl,
            get_time,
        }
    }

    pub fn get<Q>(&self, k: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = (self.get_time)();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let expired = inner.cache.get(k)?.1.is_expired(now);
        if expired {
            inner.cache.remove(k);
            return None;
        }
        inner.tick += 1;
        let tick = inner.tick;
        let mut value = None;
        inner.cache.change_priority_by(k, |slot| {
            slot.last_used = tick;
            value = Some(slot.value.clone());
        });
        value
    }

    pub fn insert(&self, k: K, v: V) {
        if self.capacity == 0 {
            return;
        }
        let expires_at = self.ttl.map(|ttl| (self.get_time)() + ttl);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.tick += 1;
        inner.cache.push(
            k,
            Slot {
                last_used: inner.tick,
                expires_at,
                value: v,
            },
        );
        while inner.cache.len() > self.capacity {
            inner.cache.pop();
        }
    }
}

impl<K, V> ClearableCache for ResultCache<K, V>
where
    K: Hash + Eq + Send,
    V: Send,
{
    fn clear(&self) {
        self.inner.lock().cache.clear();
    }

    fn len(&self) -> usize {
        self.inner.lock().cache.len()
    }
}

struct Slot<T> {
    last_used: u64,
    expires_at: Option<Instant>,
    value: T,
}

impl<T> Slot<T> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

// The least recently used slot has the highest priority so `pop` evicts it.
impl<T> Ord for Slot<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.last_used.cmp(&self.last_used)
    }
}

impl<T> PartialOrd for Slot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Eq for Slot<T> {}

impl<T> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.last_used.eq(&other.last_used)
    }
}
