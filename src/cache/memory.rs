//! In-memory cache of decoded image buffers.
//!
//! This module provides an LRU cache keyed by [`CacheKey`], bounded by the
//! aggregate byte size of the cached buffers.
//!
//! # Eviction Notification
//!
//! Every entry that leaves the cache, whether evicted for capacity, displaced
//! by a `put` on the same key, removed, or cleared, is passed to the caller's
//! `on_evict` callback before the operation returns. The cache itself knows
//! nothing about reference counting; the manager uses the callback to release
//! the cache's reference on the buffer.

use lru::LruCache;
use tracing::{debug, trace};

use crate::buffer::ImageBuffer;
use crate::key::CacheKey;

/// Default cache capacity: 64MB
pub const DEFAULT_MEMORY_CACHE_CAPACITY: usize = 64 * 1024 * 1024;

// =============================================================================
// Memory Cache
// =============================================================================

/// LRU cache of image buffers with size-based capacity.
///
/// # Thread Safety
///
/// The cache is a plain value with `&mut self` mutators. Share it behind a
/// lock together with whatever state the eviction callback touches.
///
/// # Example
///
/// ```
/// use photo_manager::{CacheKey, ImageBuffer, MemoryCache};
///
/// let mut cache = MemoryCache::with_capacity(1024);
/// let key = CacheKey::derive_sized("a.jpg", 8, 8);
///
/// let mut evicted = Vec::new();
/// cache.put(key.clone(), ImageBuffer::new(8, 8), |k, _| evicted.push(k));
///
/// assert!(cache.get(&key).is_some());
/// assert!(evicted.is_empty());
/// ```
pub struct MemoryCache {
    /// The underlying LRU cache
    cache: LruCache<CacheKey, ImageBuffer>,

    /// Maximum total size in bytes
    max_size: usize,

    /// Current total size in bytes
    current_size: usize,
}

impl MemoryCache {
    /// Create a new cache with default capacity (64MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CACHE_CAPACITY)
    }

    /// Create a new cache with the specified capacity in bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            cache: LruCache::unbounded(),
            max_size,
            current_size: 0,
        }
    }

    /// Get a buffer, marking the entry as recently used.
    pub fn get(&mut self, key: &CacheKey) -> Option<ImageBuffer> {
        match self.cache.get(key) {
            Some(buffer) => {
                trace!(key = %key, "Memory cache hit");
                Some(buffer.clone())
            }
            None => {
                trace!(key = %key, "Memory cache miss");
                None
            }
        }
    }

    /// Get a buffer without updating LRU order.
    pub fn peek(&self, key: &CacheKey) -> Option<ImageBuffer> {
        self.cache.peek(key).cloned()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.contains(key)
    }

    /// Whether a buffer of this size can be cached at all.
    pub fn fits(&self, buffer: &ImageBuffer) -> bool {
        buffer.byte_size() <= self.max_size
    }

    /// Store a buffer.
    ///
    /// A previous buffer under the same key and any least-recently-used
    /// entries evicted to stay within capacity are passed to `on_evict`.
    /// Returns `false` without inserting if the buffer alone exceeds the
    /// capacity.
    pub fn put<F>(&mut self, key: CacheKey, buffer: ImageBuffer, mut on_evict: F) -> bool
    where
        F: FnMut(CacheKey, ImageBuffer),
    {
        if !self.fits(&buffer) {
            debug!(key = %key, size = buffer.byte_size(), "Buffer larger than memory cache, not caching");
            return false;
        }

        let data_size = buffer.byte_size();

        if let Some((old_key, old_buffer)) = self.cache.push(key, buffer) {
            self.current_size = self.current_size.saturating_sub(old_buffer.byte_size());
            debug!(key = %old_key, "Replaced memory cache entry");
            on_evict(old_key, old_buffer);
        }
        self.current_size += data_size;

        // Evict entries until we're under capacity
        while self.current_size > self.max_size {
            match self.cache.pop_lru() {
                Some((evicted_key, evicted)) => {
                    self.current_size = self.current_size.saturating_sub(evicted.byte_size());
                    debug!(key = %evicted_key, size = evicted.byte_size(), "Evicted from memory cache");
                    on_evict(evicted_key, evicted);
                }
                None => break,
            }
        }

        true
    }

    /// Remove an entry, passing it to `on_evict`.
    pub fn remove<F>(&mut self, key: &CacheKey, mut on_evict: F) -> bool
    where
        F: FnMut(CacheKey, ImageBuffer),
    {
        match self.cache.pop_entry(key) {
            Some((key, buffer)) => {
                self.current_size = self.current_size.saturating_sub(buffer.byte_size());
                on_evict(key, buffer);
                true
            }
            None => false,
        }
    }

    /// Remove every entry, least recently used first, passing each to `on_evict`.
    pub fn clear<F>(&mut self, mut on_evict: F)
    where
        F: FnMut(CacheKey, ImageBuffer),
    {
        while let Some((key, buffer)) = self.cache.pop_lru() {
            on_evict(key, buffer);
        }
        self.current_size = 0;
    }

    /// Number of cached buffers.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Current total size of cached buffers in bytes.
    pub fn size(&self) -> usize {
        self.current_size
    }

    /// Maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
