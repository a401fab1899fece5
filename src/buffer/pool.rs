//! Reference counting and size-bucketed recycling of mutable buffers.
//!
//! # Lifecycle
//!
//! ```text
//!            acquire                release (count > 1)
//!  untracked ───────► tracked(1) ◄────────────────────► tracked(n)
//!      ▲                   │
//!      │                   │ release (count reaches 0)
//!      │ take_recycled     ▼
//!      └──────────── recycle FIFO[(w, h)]
//! ```
//!
//! The count table is keyed by [`BufferId`], not by cache key: the same
//! buffer may be held by the memory cache and by callers at the same time.
//! When the count reaches zero the entry is removed from the table (never
//! left at zero) so a reissued buffer starts a fresh counting lifecycle.
//!
//! # Bounds
//!
//! Each size bucket keeps at most `max_per_size` buffers. Pushing onto a
//! full bucket drops the oldest buffer, returning its memory to the
//! allocator.
//!
//! # Thread Safety
//!
//! The pool is a plain single-owner value. The manager keeps it behind the
//! same lock as the memory cache so acquire, release and eviction are
//! linearized.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, trace};

use super::{BufferId, ImageBuffer};
use crate::error::PoolError;

/// Default number of buffers retained per (width, height) bucket.
pub const DEFAULT_MAX_RECYCLED_PER_SIZE: usize = 4;

/// Outcome of a successful [`BufferPool::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Buffer is immutable and not tracked
    Untracked,
    /// Buffer is still referenced this many times
    Retained(usize),
    /// Count reached zero and the buffer moved into the recycle pool
    Recycled,
}

/// Reference counter plus recycle pool for mutable image buffers.
#[derive(Debug)]
pub struct BufferPool {
    counts: HashMap<BufferId, usize>,
    recycled: HashMap<(u32, u32), VecDeque<ImageBuffer>>,
    max_per_size: usize,
}

impl BufferPool {
    /// Create a pool with the default per-size bound.
    pub fn new() -> Self {
        Self::with_max_per_size(DEFAULT_MAX_RECYCLED_PER_SIZE)
    }

    /// Create a pool keeping at most `max_per_size` buffers per size bucket.
    ///
    /// A bound of zero disables recycling; released buffers are dropped.
    pub fn with_max_per_size(max_per_size: usize) -> Self {
        Self {
            counts: HashMap::new(),
            recycled: HashMap::new(),
            max_per_size,
        }
    }

    /// Record one more owner of `buffer`.
    ///
    /// Immutable buffers are ignored. If the buffer was sitting in the
    /// recycle pool it is taken back out, since it is owned again.
    pub fn acquire(&mut self, buffer: &ImageBuffer) {
        if !buffer.is_mutable() {
            return;
        }

        let count = self.counts.entry(buffer.id()).or_insert(0);
        *count += 1;
        trace!(buffer = %buffer.id(), count = *count, "Acquired buffer");

        if *count == 1 {
            self.reclaim(buffer);
        }
    }

    /// Drop one owner of `buffer`.
    ///
    /// When the last owner is released the buffer moves into the recycle pool
    /// under its exact dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ReferenceImbalance`] if the buffer is mutable but
    /// not tracked, i.e. it was released more often than acquired. Pool state
    /// is left untouched in that case.
    pub fn release(&mut self, buffer: ImageBuffer) -> Result<Release, PoolError> {
        if !buffer.is_mutable() {
            return Ok(Release::Untracked);
        }

        let id = buffer.id();
        let Some(count) = self.counts.get_mut(&id) else {
            return Err(PoolError::ReferenceImbalance { buffer: id });
        };

        *count -= 1;
        if *count > 0 {
            trace!(buffer = %id, count = *count, "Released buffer");
            return Ok(Release::Retained(*count));
        }

        self.counts.remove(&id);
        self.push_recycled(buffer);
        Ok(Release::Recycled)
    }

    /// Take a pooled buffer of exactly `width` x `height`.
    ///
    /// Buffers are handed out oldest first. Buffers whose handle is still
    /// shared with someone outside the pool are skipped so their pixels are
    /// never overwritten under a reader. Zero-sized requests never recycle.
    pub fn take_recycled(&mut self, width: u32, height: u32) -> Option<ImageBuffer> {
        if width == 0 || height == 0 {
            return None;
        }

        let queue = self.recycled.get_mut(&(width, height))?;
        let idx = queue.iter().position(ImageBuffer::is_unique)?;
        let buffer = queue.remove(idx)?;
        if queue.is_empty() {
            self.recycled.remove(&(width, height));
        }

        debug!(buffer = %buffer.id(), width, height, "Reissuing recycled buffer");
        Some(buffer)
    }

    /// Return a buffer obtained from [`take_recycled`](Self::take_recycled)
    /// that ended up unused.
    pub fn restore(&mut self, buffer: ImageBuffer) {
        if !buffer.is_mutable() || self.counts.contains_key(&buffer.id()) {
            return;
        }
        self.push_recycled(buffer);
    }

    fn push_recycled(&mut self, buffer: ImageBuffer) {
        if self.max_per_size == 0 {
            return;
        }

        let dims = buffer.dimensions();
        let queue = self.recycled.entry(dims).or_default();
        if queue.iter().any(|b| b.same_buffer(&buffer)) {
            return;
        }

        if queue.len() >= self.max_per_size {
            if let Some(dropped) = queue.pop_front() {
                debug!(buffer = %dropped.id(), width = dims.0, height = dims.1, "Recycle bucket full, dropping oldest");
            }
        }

        debug!(buffer = %buffer.id(), width = dims.0, height = dims.1, "Recycled buffer");
        queue.push_back(buffer);
    }

    fn reclaim(&mut self, buffer: &ImageBuffer) {
        let dims = buffer.dimensions();
        if let Some(queue) = self.recycled.get_mut(&dims) {
            queue.retain(|b| !b.same_buffer(buffer));
            if queue.is_empty() {
                self.recycled.remove(&dims);
            }
        }
    }

    /// Current reference count of `buffer`, `None` if untracked.
    pub fn ref_count(&self, buffer: &ImageBuffer) -> Option<usize> {
        self.counts.get(&buffer.id()).copied()
    }

    pub fn is_tracked(&self, buffer: &ImageBuffer) -> bool {
        self.counts.contains_key(&buffer.id())
    }

    /// Whether `buffer` is currently waiting in the recycle pool.
    pub fn is_pooled(&self, buffer: &ImageBuffer) -> bool {
        self.recycled
            .get(&buffer.dimensions())
            .is_some_and(|q| q.iter().any(|b| b.same_buffer(buffer)))
    }

    /// Number of pooled buffers of the given size.
    pub fn pooled_count(&self, width: u32, height: u32) -> usize {
        self.recycled.get(&(width, height)).map_or(0, VecDeque::len)
    }

    /// Number of pooled buffers across all sizes.
    pub fn pooled_total(&self) -> usize {
        self.recycled.values().map(VecDeque::len).sum()
    }

    /// Total bytes held by pooled buffers.
    pub fn pooled_bytes(&self) -> usize {
        self.recycled
            .values()
            .flat_map(|q| q.iter())
            .map(ImageBuffer::byte_size)
            .sum()
    }

    /// Number of buffers with a live reference count.
    pub fn tracked_total(&self) -> usize {
        self.counts.len()
    }

    /// Drop every pooled buffer.
    pub fn clear_recycled(&mut self) {
        self.recycled.clear();
    }

    pub fn max_per_size(&self) -> usize {
        self.max_per_size
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}
