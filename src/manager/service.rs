//! The request coordinator.
//!
//! # Request Pipeline
//!
//! ```text
//! request(path, mode, w, h, cb)
//!     │
//!     ├─ memory hit ──────────────────────────────► cb.on_load_completed (caller thread)
//!     │
//!     └─ miss: take recycled (w, h) buffer
//!          │
//!          ▼  job: disk lookup
//!        DiskStore::get
//!          ├─ hit  ─► job: Decode bytes ──────┐
//!          └─ miss ─► job: mode transform ────┤ (+ write-back job on success)
//!                                             ▼
//!                          acquire + memory put + callback
//! ```
//!
//! Every job carries the request's token, so [`PhotoManager::cancel`] can
//! drop whatever has not started yet.

use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, trace, warn};

use super::request::{LoadRequest, Stage};
use super::{LoadCallback, LoadMode};
use crate::buffer::{BufferPool, ImageBuffer, Release};
use crate::cache::{DiskCache, DiskStore, MemoryCache};
use crate::config::ManagerConfig;
use crate::error::{IoError, LoadError, PoolError};
use crate::exec::{Executor, RequestToken, TokenRegistry};
use crate::key::CacheKey;
use crate::resize::{ImageResizer, Resizer, Transform, TransformOutput};

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of manager activity and resource usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// Requests received
    pub requests: u64,
    /// Requests answered from the memory cache
    pub memory_hits: u64,
    /// Requests decoded from the disk cache
    pub disk_hits: u64,
    /// Requests transformed from the source
    pub transforms: u64,
    /// Requests delivered successfully from a background job
    pub completed: u64,
    /// Requests delivered as failures
    pub failed: u64,
    /// Results written into a recycled buffer
    pub recycled_reused: u64,
    /// Disk write-backs that succeeded
    pub write_backs: u64,
    /// Disk write-backs that failed
    pub write_back_failures: u64,

    /// Entries in the memory cache
    pub memory_entries: usize,
    /// Bytes held by the memory cache
    pub memory_bytes: usize,
    /// Memory cache capacity in bytes
    pub memory_capacity: usize,
    /// Buffers waiting in the recycle pool
    pub pooled_buffers: usize,
    /// Bytes waiting in the recycle pool
    pub pooled_bytes: usize,
    /// Mutable buffers with an outstanding reference
    pub tracked_buffers: usize,
}

// =============================================================================
// Shared State
// =============================================================================

struct State {
    memory: MemoryCache,
    pool: BufferPool,
    tokens: TokenRegistry<dyn LoadCallback>,
    stats: ManagerStats,
}

impl State {
    /// Cache `buffer` under `key`, taking one reference for the cache hold.
    fn insert(&mut self, key: CacheKey, buffer: &ImageBuffer) -> bool {
        let State { memory, pool, .. } = self;
        if !memory.fits(buffer) {
            debug!(key = %key, size = buffer.byte_size(), "Result too large for memory cache, not caching");
            return false;
        }

        pool.acquire(buffer);
        memory.put(key, buffer.clone(), |evicted_key, evicted| {
            release_evicted(pool, &evicted_key, evicted)
        })
    }
}

/// Release the cache's reference on a buffer leaving the memory cache.
fn release_evicted(pool: &mut BufferPool, key: &CacheKey, buffer: ImageBuffer) {
    let released = pool.release(buffer);
    match &released {
        Ok(Release::Recycled) => debug!(key = %key, "Evicted buffer moved to recycle pool"),
        Ok(_) => trace!(key = %key, "Evicted buffer still referenced"),
        Err(e) => error!(key = %key, error = %e, "Buffer reference imbalance on eviction"),
    }
    debug_assert!(released.is_ok(), "{:?}", released);
}

struct Shared<D, R> {
    disk: D,
    resizer: R,
    executor: Arc<dyn Executor>,
    state: Mutex<State>,
}

// =============================================================================
// Photo Manager
// =============================================================================

/// Coordinates image loads across the memory cache, the disk cache, the
/// resizer and the background executor.
///
/// Cloning is cheap and clones share all state.
///
/// # Buffer Ownership
///
/// Each cached mutable buffer holds one reference in the manager's buffer
/// pool. Callers that keep a delivered buffer beyond its cache lifetime and
/// want it protected from recycling may [`acquire`](Self::acquire) it and
/// must later [`release`](Self::release) it. Independently of counting, a
/// buffer is never overwritten while any handle to it is alive.
pub struct PhotoManager<D: DiskStore, R: Resizer> {
    shared: Arc<Shared<D, R>>,
}

impl<D: DiskStore, R: Resizer> Clone for PhotoManager<D, R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl PhotoManager<DiskCache, ImageResizer> {
    /// Create a manager with a directory-backed disk cache and the
    /// `image`-crate resizer.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created or read.
    pub async fn open(config: ManagerConfig, executor: Arc<dyn Executor>) -> Result<Self, IoError> {
        let disk = DiskCache::open(&config.cache_dir, config.disk_cache_size).await?;
        Ok(Self::new(config, disk, ImageResizer::new(), executor))
    }
}

impl<D: DiskStore, R: Resizer> PhotoManager<D, R> {
    pub fn new(config: ManagerConfig, disk: D, resizer: R, executor: Arc<dyn Executor>) -> Self {
        debug!(
            memory_cache_size = config.memory_cache_size,
            max_recycled_per_size = config.max_recycled_per_size,
            "Created photo manager"
        );

        let state = State {
            memory: MemoryCache::with_capacity(config.memory_cache_size),
            pool: BufferPool::with_max_per_size(config.max_recycled_per_size),
            tokens: TokenRegistry::new(),
            stats: ManagerStats::default(),
        };

        Self {
            shared: Arc::new(Shared {
                disk,
                resizer,
                executor,
                state: Mutex::new(state),
            }),
        }
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Load the image at its native size.
    pub fn load(&self, path: impl AsRef<Path>, callback: Arc<dyn LoadCallback>) -> RequestToken {
        self.request(path, LoadMode::AsIs, 0, 0, callback)
    }

    /// Load the image downsampled to roughly `width` x `height`, preserving
    /// aspect ratio and never smaller than the box.
    pub fn load_sized(
        &self,
        path: impl AsRef<Path>,
        width: u32,
        height: u32,
        callback: Arc<dyn LoadCallback>,
    ) -> RequestToken {
        self.request(path, LoadMode::Approximate, width, height, callback)
    }

    /// Load the image scaled and centre-cropped to exactly `width` x `height`.
    pub fn center_crop(
        &self,
        path: impl AsRef<Path>,
        width: u32,
        height: u32,
        callback: Arc<dyn LoadCallback>,
    ) -> RequestToken {
        self.request(path, LoadMode::CenterCrop, width, height, callback)
    }

    /// Load the image scaled to fit inside `width` x `height`.
    pub fn fit_center(
        &self,
        path: impl AsRef<Path>,
        width: u32,
        height: u32,
        callback: Arc<dyn LoadCallback>,
    ) -> RequestToken {
        self.request(path, LoadMode::FitCenter, width, height, callback)
    }

    /// Issue a request in any mode.
    ///
    /// A memory cache hit invokes `callback` before this returns. Otherwise
    /// the work is scheduled on the executor and the callback fires from a
    /// background job. The returned token equals the token of every other
    /// request made with the same callback object while that object is
    /// alive. Tokens are never reused, so cancelling a stale token cannot
    /// affect later requests.
    pub fn request(
        &self,
        path: impl AsRef<Path>,
        mode: LoadMode,
        width: u32,
        height: u32,
        callback: Arc<dyn LoadCallback>,
    ) -> RequestToken {
        let (mut request, hit) = {
            let mut state = self.shared.state.lock();
            let token = state.tokens.token_for(&callback);
            let mut request =
                LoadRequest::new(path.as_ref().to_path_buf(), mode, width, height, token, callback);

            state.stats.requests += 1;
            let hit = state.memory.get(&request.key);
            if hit.is_some() {
                state.stats.memory_hits += 1;
            } else if request.wants_recycled() {
                request.recycled = state.pool.take_recycled(request.width, request.height);
            }
            (request, hit)
        };
        let token = request.token;

        if let Some(buffer) = hit {
            request.advance(Stage::MemoryHit);
            trace!(key = %request.key, "Serving from memory cache");
            request.callback.on_load_completed(buffer);
            return token;
        }

        debug!(
            key = %request.key,
            path = %request.source.display(),
            mode = ?request.mode,
            width = request.width,
            height = request.height,
            recycled = request.recycled.is_some(),
            "Scheduling disk lookup"
        );
        request.advance(Stage::DiskCheck);
        let shared = self.shared.clone();
        self.shared
            .executor
            .schedule(token, shared.check_disk(request).boxed());

        token
    }

    /// Drop every queued job belonging to `token`.
    ///
    /// Jobs already running finish, and a job that finishes may schedule its
    /// next stage after this call. Cancelled requests receive no callback.
    pub fn cancel(&self, token: RequestToken) {
        debug!(?token, "Cancelling request");
        self.shared.executor.cancel_all(token);
    }

    // =========================================================================
    // Buffer References
    // =========================================================================

    /// Record an extra owner of `buffer`, keeping it out of the recycle pool
    /// until a matching [`release`](Self::release).
    pub fn acquire(&self, buffer: &ImageBuffer) {
        self.shared.state.lock().pool.acquire(buffer);
    }

    /// Drop an owner recorded with [`acquire`](Self::acquire).
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ReferenceImbalance`] if `buffer` is mutable and
    /// has no outstanding reference.
    pub fn release(&self, buffer: ImageBuffer) -> Result<Release, PoolError> {
        self.shared.state.lock().pool.release(buffer)
    }

    /// Take a recycled buffer of exactly `width` x `height`, if one is free.
    pub fn take_recycled(&self, width: u32, height: u32) -> Option<ImageBuffer> {
        self.shared.state.lock().pool.take_recycled(width, height)
    }

    // =========================================================================
    // Cache Control
    // =========================================================================

    /// Whether the result for `path` at `width` x `height` is in memory.
    ///
    /// Use `0, 0` for results of [`load`](Self::load).
    pub fn is_cached(&self, path: impl AsRef<Path>, width: u32, height: u32) -> bool {
        let key = CacheKey::for_path(path.as_ref(), width, height);
        self.shared.state.lock().memory.contains(&key)
    }

    /// Remove one result from the memory cache, releasing its reference.
    pub fn evict(&self, path: impl AsRef<Path>, width: u32, height: u32) -> bool {
        let key = CacheKey::for_path(path.as_ref(), width, height);
        let mut state = self.shared.state.lock();
        let State { memory, pool, .. } = &mut *state;
        memory.remove(&key, |k, buffer| release_evicted(pool, &k, buffer))
    }

    /// Empty the memory cache, releasing every cached reference.
    pub fn clear_memory(&self) {
        let mut state = self.shared.state.lock();
        let State { memory, pool, .. } = &mut *state;
        memory.clear(|k, buffer| release_evicted(pool, &k, buffer));
        debug!("Cleared memory cache");
    }

    /// Current statistics.
    pub fn stats(&self) -> ManagerStats {
        let state = self.shared.state.lock();
        ManagerStats {
            memory_entries: state.memory.len(),
            memory_bytes: state.memory.size(),
            memory_capacity: state.memory.capacity(),
            pooled_buffers: state.pool.pooled_total(),
            pooled_bytes: state.pool.pooled_bytes(),
            tracked_buffers: state.pool.tracked_total(),
            ..state.stats.clone()
        }
    }

    /// The disk store backing this manager.
    pub fn disk(&self) -> &D {
        &self.shared.disk
    }

    pub fn resizer(&self) -> &R {
        &self.shared.resizer
    }
}

// =============================================================================
// Background Stages
// =============================================================================

impl<D: DiskStore, R: Resizer> Shared<D, R> {
    async fn check_disk(self: Arc<Self>, mut request: LoadRequest) {
        let cached = match self.disk.get(&request.key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %request.key, error = %e, "Disk cache read failed, treating as miss");
                None
            }
        };

        let transform = match cached {
            Some(bytes) => {
                request.advance(Stage::DiskHit);
                self.state.lock().stats.disk_hits += 1;
                request.decode(bytes)
            }
            None => {
                request.advance(Stage::DiskMiss);
                self.state.lock().stats.transforms += 1;
                request.transform()
            }
        };

        debug!(key = %request.key, transform = transform.name(), "Scheduling transform");
        let token = request.token;
        let shared = self.clone();
        self.executor
            .schedule(token, shared.run_transform(request, transform).boxed());
    }

    async fn run_transform(self: Arc<Self>, mut request: LoadRequest, transform: Transform) {
        let recycled = request.recycled.take();
        let recycled_id = recycled.as_ref().map(ImageBuffer::id);

        let shared = self.clone();
        let output = match tokio::task::spawn_blocking(move || shared.resizer.run(transform, recycled))
            .await
        {
            Ok(output) => output,
            Err(e) => TransformOutput::failure(
                LoadError::Worker {
                    message: e.to_string(),
                },
                None,
            ),
        };

        if let Some(unused) = output.unused {
            trace!(buffer = %unused.id(), "Returning unused recycled buffer");
            self.state.lock().pool.restore(unused);
        }

        match output.result {
            Ok(buffer) => {
                if recycled_id == Some(buffer.id()) {
                    self.state.lock().stats.recycled_reused += 1;
                }
                self.complete(request, buffer);
            }
            Err(e) => self.fail(request, e),
        }
    }

    fn complete(self: &Arc<Self>, mut request: LoadRequest, buffer: ImageBuffer) {
        let write_back = request.stage() == Stage::DiskMiss;

        {
            let mut state = self.state.lock();
            state.insert(request.key.clone(), &buffer);
            state.stats.completed += 1;
        }

        if write_back {
            let shared = self.clone();
            self.executor.schedule(
                request.token,
                shared
                    .write_back(request.key.clone(), buffer.clone())
                    .boxed(),
            );
        }

        request.advance(Stage::Complete);
        debug!(
            key = %request.key,
            width = buffer.width(),
            height = buffer.height(),
            "Load complete"
        );
        request.callback.on_load_completed(buffer);
    }

    fn fail(&self, mut request: LoadRequest, error: LoadError) {
        self.state.lock().stats.failed += 1;
        request.advance(Stage::Failed);
        warn!(key = %request.key, path = %request.source.display(), error = %error, "Load failed");
        request.callback.on_load_failed(error);
    }

    async fn write_back(self: Arc<Self>, key: CacheKey, buffer: ImageBuffer) {
        match self.disk.put(&key, &buffer).await {
            Ok(()) => {
                trace!(key = %key, "Wrote result to disk cache");
                self.state.lock().stats.write_backs += 1;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Disk cache write-back failed");
                self.state.lock().stats.write_back_failures += 1;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
