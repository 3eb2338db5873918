//! Bounded, expiring key/value cache used for create-post deduplication and
//! for a few small read caches.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

pub const PENDING_POST_CACHE_SIZE: usize = 25_000;
pub const PENDING_POST_TTL: Duration = Duration::from_secs(30);

struct Entry<V> {
    value: V,
    expires_at: Instant,
    seq: u64,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    by_age: BTreeMap<u64, String>,
    next_seq: u64,
}

impl<V> Inner<V> {
    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.by_age.remove(&entry.seq);
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.remove(&key);
        }
    }

    fn insert(&mut self, key: String, value: V, expires_at: Instant, capacity: usize) {
        self.remove(&key);
        if self.entries.len() >= capacity {
            self.purge_expired(Instant::now());
        }
        while self.entries.len() >= capacity {
            let Some((_, oldest)) = self.by_age.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_age.insert(seq, key.clone());
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at,
                seq,
            },
        );
    }

    fn live(&mut self, key: &str, now: Instant) -> Option<&Entry<V>> {
        if self.entries.get(key).is_some_and(|e| e.expires_at <= now) {
            self.remove(key);
        }
        self.entries.get(key)
    }
}

/// Insert-if-absent cache whose check and insert happen under one lock.
pub struct ExpiringCache<V> {
    inner: Arc<Mutex<Inner<V>>>,
    capacity: usize,
    ttl: Duration,
}

impl<V> Clone for ExpiringCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            capacity: self.capacity,
            ttl: self.ttl,
        }
    }
}

impl<V: Clone> ExpiringCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                by_age: BTreeMap::new(),
                next_seq: 0,
            })),
            capacity: capacity.max(1),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        // A panic while holding the lock cannot leave the maps inconsistent
        // enough to matter for a cache.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the live value for `key` with `true`, or stores `value` and
    /// returns it with `false`.
    pub fn get_or_add(&self, key: &str, value: V) -> (V, bool) {
        let now = Instant::now();
        let mut inner = self.lock();
        if let Some(entry) = inner.live(key, now) {
            return (entry.value.clone(), true);
        }
        inner.insert(key.to_string(), value.clone(), now + self.ttl, self.capacity);
        (value, false)
    }

    /// Stores `value` with a fresh expiry, replacing any previous entry.
    pub fn add_with_expiry(&self, key: &str, value: V) {
        let now = Instant::now();
        self.lock()
            .insert(key.to_string(), value, now + self.ttl, self.capacity);
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        self.lock().live(key, now).map(|e| e.value.clone())
    }

    pub fn remove(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.purge_expired(now);
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State of a client-supplied pending post id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingPost {
    InFlight,
    Created(String),
}

pub type PendingPostCache = ExpiringCache<PendingPost>;

pub fn pending_post_cache() -> PendingPostCache {
    ExpiringCache::new(PENDING_POST_CACHE_SIZE, PENDING_POST_TTL)
}

/// Outcome of claiming a pending post id.
pub enum PendingClaim {
    /// No id was supplied; nothing to deduplicate.
    Unclaimed,
    /// This caller owns the slot and must complete it or let it drop.
    Owner(PendingPostGuard),
    /// Another caller is still creating this post.
    InFlight,
    /// The post already exists under this id.
    Created(String),
}

impl PendingPostCache {
    pub fn claim(&self, pending_post_id: Option<&str>) -> PendingClaim {
        let Some(key) = pending_post_id else {
            return PendingClaim::Unclaimed;
        };
        match self.get_or_add(key, PendingPost::InFlight) {
            (_, false) => PendingClaim::Owner(PendingPostGuard {
                cache: self.clone(),
                key: Some(key.to_string()),
            }),
            (PendingPost::InFlight, true) => PendingClaim::InFlight,
            (PendingPost::Created(id), true) => PendingClaim::Created(id),
        }
    }
}

/// Removes its in-flight slot on drop unless `complete` ran first, so a
/// failed create never strands a pending id.
pub struct PendingPostGuard {
    cache: PendingPostCache,
    key: Option<String>,
}

impl PendingPostGuard {
    pub fn complete(mut self, post_id: &str) {
        if let Some(key) = self.key.take() {
            self.cache
                .add_with_expiry(&key, PendingPost::Created(post_id.to_string()));
        }
    }
}

impl Drop for PendingPostGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.cache.remove(&key);
        }
    }
}
