//! Chunk plaintext cache
//!
//! A byte-budget LRU keyed by content address, shared by the random
//! access read path. Concurrent loads of the same chunk are coalesced:
//! the first caller fetches while the others wait on the result instead
//! of hitting the backends a second time.

use bytes::Bytes;
use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use snapsafe_core::error::Result;
use std::collections::HashSet;
use tracing::debug;

/// Default cache budget: 64 MB of chunk plaintext
pub const DEFAULT_CACHE_BUDGET: usize = 64 * 1024 * 1024;

struct CacheInner {
    entries: LruCache<String, Bytes>,
    bytes: usize,
    in_flight: HashSet<String>,
}

/// Byte-bounded LRU cache over decoded chunk plaintexts
pub struct ChunkCache {
    inner: Mutex<CacheInner>,
    loaded: Condvar,
    budget: usize,
}

impl ChunkCache {
    /// Create a cache with the default byte budget
    pub fn new() -> Self {
        Self::with_budget(DEFAULT_CACHE_BUDGET)
    }

    /// Create a cache bounded to `budget` bytes of plaintext
    pub fn with_budget(budget: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                bytes: 0,
                in_flight: HashSet::new(),
            }),
            loaded: Condvar::new(),
            budget,
        }
    }

    /// Current plaintext bytes held
    pub fn bytes(&self) -> usize {
        self.inner.lock().bytes
    }

    /// Number of cached chunks
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch a cached plaintext without loading
    pub fn get(&self, sha_sum: &str) -> Option<Bytes> {
        self.inner.lock().entries.get(sha_sum).cloned()
    }

    /// Return the cached plaintext for `sha_sum`, or produce it with `load`
    ///
    /// The cache mutex is never held across `load`; a second caller for
    /// the same address blocks until the first one's result lands, then
    /// reads it from the cache. A failed load wakes the waiters, who then
    /// retry the load themselves.
    pub fn get_or_load<F>(&self, sha_sum: &str, load: F) -> Result<Bytes>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let mut inner = self.inner.lock();
        loop {
            if let Some(data) = inner.entries.get(sha_sum) {
                return Ok(data.clone());
            }
            if inner.in_flight.insert(sha_sum.to_string()) {
                break;
            }
            // Another caller is loading this chunk
            self.loaded.wait(&mut inner);
        }
        drop(inner);

        let result = load();

        let mut inner = self.inner.lock();
        inner.in_flight.remove(sha_sum);
        let data = match result {
            Ok(plaintext) => {
                let data = Bytes::from(plaintext);
                self.insert_locked(&mut inner, sha_sum, data.clone());
                data
            }
            Err(err) => {
                self.loaded.notify_all();
                return Err(err);
            }
        };
        self.loaded.notify_all();
        Ok(data)
    }

    /// Insert a plaintext directly (used by decode paths that already
    /// hold the data)
    pub fn insert(&self, sha_sum: &str, data: Bytes) {
        let mut inner = self.inner.lock();
        self.insert_locked(&mut inner, sha_sum, data);
    }

    fn insert_locked(&self, inner: &mut CacheInner, sha_sum: &str, data: Bytes) {
        if let Some(old) = inner.entries.put(sha_sum.to_string(), data.clone()) {
            inner.bytes -= old.len();
        }
        inner.bytes += data.len();

        while inner.bytes > self.budget && inner.entries.len() > 1 {
            if let Some((evicted, old)) = inner.entries.pop_lru() {
                inner.bytes -= old.len();
                debug!(sha_sum = %evicted, "evicted chunk from cache");
            } else {
                break;
            }
        }
    }
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::new()
    }
}
