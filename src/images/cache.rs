//! Bounded, TTL-aware image cache plus the in-flight table that collapses
//! concurrent identical requests into one fetch.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use log::debug;

use super::{ImagePayload, ImageRequestKey};
use crate::{lock, CacheConfig, Result};

/// Source of "now" for TTL and recency bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by `Instant::now`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to; used to test expiry.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

struct CacheEntry {
    payload: ImagePayload,
    last_access: Instant,
    // Breaks ties between entries touched within the same clock reading.
    access_seq: u64,
}

/// Fingerprint → payload cache with LRU eviction and a fixed TTL.
///
/// `get` refreshes recency, so eviction removes the least recently
/// accessed entry rather than the oldest insertion.
pub struct ImageCache {
    entries: HashMap<ImageRequestKey, CacheEntry>,
    ttl: Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
    next_seq: u64,
}

impl ImageCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: config.ttl(),
            capacity: config.capacity,
            clock,
            next_seq: 0,
        }
    }

    /// Look up a fresh entry. Expired entries are dropped and reported as a
    /// miss; hits have their access time bumped.
    pub fn get(&mut self, key: &ImageRequestKey) -> Option<ImagePayload> {
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            None => return None,
            Some(entry) => now.saturating_duration_since(entry.last_access) > self.ttl,
        };
        if expired {
            debug!("image cache entry expired: {}", key);
            self.entries.remove(key);
            return None;
        }
        let seq = self.bump_seq();
        let entry = self.entries.get_mut(key)?;
        entry.last_access = now;
        entry.access_seq = seq;
        Some(entry.payload.clone())
    }

    /// Insert or overwrite, then evict the least recently accessed entry if
    /// the capacity bound is exceeded.
    pub fn put(&mut self, key: ImageRequestKey, payload: ImagePayload) {
        let entry = CacheEntry {
            payload,
            last_access: self.clock.now(),
            access_seq: self.bump_seq(),
        };
        self.entries.insert(key, entry);
        if self.entries.len() > self.capacity {
            self.evict_oldest();
        }
    }

    /// Whether a fresh entry exists, without touching recency.
    pub fn contains(&self, key: &ImageRequestKey) -> bool {
        let now = self.clock.now();
        self.entries
            .get(key)
            .map(|e| now.saturating_duration_since(e.last_access) <= self.ttl)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.last_access, e.access_seq))
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            debug!("image cache evicting {}", key);
            self.entries.remove(&key);
        }
    }
}

impl fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageCache")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// A pending fetch shared by every caller asking for the same key.
pub(crate) type PendingImage = Shared<BoxFuture<'static, Result<ImagePayload>>>;

pub(crate) enum Lookup {
    Hit(ImagePayload),
    Pending(PendingImage),
}

/// Cache plus in-flight table. Lock order is always `in_flight` then
/// `cache`.
pub(crate) struct DedupCache {
    cache: Mutex<ImageCache>,
    in_flight: Mutex<HashMap<ImageRequestKey, PendingImage>>,
}

impl DedupCache {
    pub(crate) fn new(cache: ImageCache) -> Arc<Self> {
        Arc::new(Self {
            cache: Mutex::new(cache),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Return a cached payload, join an existing in-flight fetch, or start
    /// `fetch` and publish it. `fetch` is only invoked in the last case.
    ///
    /// The started fetch populates the cache on success (when `use_cache`)
    /// and removes its own in-flight entry however it settles.
    pub(crate) fn lookup<F, Fut>(
        self: &Arc<Self>,
        key: &ImageRequestKey,
        use_cache: bool,
        fetch: F,
    ) -> Lookup
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ImagePayload>> + Send + 'static,
    {
        let mut in_flight = lock(&self.in_flight);
        if use_cache {
            if let Some(hit) = lock(&self.cache).get(key) {
                return Lookup::Hit(hit);
            }
        }
        if let Some(pending) = in_flight.get(key) {
            debug!("joining in-flight image request {}", key);
            return Lookup::Pending(pending.clone());
        }

        let table = Arc::clone(self);
        let owned_key = key.clone();
        let upstream = fetch();
        let pending = async move {
            let result = upstream.await;
            let mut in_flight = lock(&table.in_flight);
            if use_cache {
                if let Ok(payload) = &result {
                    lock(&table.cache).put(owned_key.clone(), payload.clone());
                }
            }
            in_flight.remove(&owned_key);
            result
        }
        .boxed()
        .shared();
        in_flight.insert(key.clone(), pending.clone());
        Lookup::Pending(pending)
    }

    pub(crate) fn in_flight_len(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub(crate) fn cached_len(&self) -> usize {
        lock(&self.cache).len()
    }
}
