//! # Photo Manager
//!
//! Loading, transforming and caching of decoded image buffers for
//! latency-sensitive, UI-driven applications.
//!
//! A request names a source path, optional target dimensions and a transform
//! mode. The manager answers from memory when it can, otherwise from an
//! encoded copy on disk, otherwise by decoding and resizing the source on a
//! background executor. Memory and disk usage are both bounded, and mutable
//! buffers evicted from memory are recycled for later requests of the same
//! size instead of being reallocated.
//!
//! ## Architecture
//!
//! - [`key`] - Cache key derivation from path and size
//! - [`buffer`] - Image buffers, reference counting and the recycle pool
//! - [`cache`] - Memory and disk caches
//! - [`resize`] - Decode and resize transforms
//! - [`exec`] - Background executors and cancellation tokens
//! - [`manager`] - The request coordinator
//! - [`config`] - CLI and construction settings
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use photo_manager::{callback_fn, ManagerConfig, PhotoManager, WorkerPool};
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = Arc::new(WorkerPool::new(4));
//!     let manager = PhotoManager::open(ManagerConfig::default(), executor)
//!         .await
//!         .unwrap();
//!
//!     let callback = callback_fn(
//!         |buffer| println!("ready: {}x{}", buffer.width(), buffer.height()),
//!         |error| eprintln!("failed: {}", error),
//!     );
//!     let token = manager.center_crop("photos/cat.jpg", 256, 256, callback);
//!
//!     // The view scrolled away before the load finished
//!     manager.cancel(token);
//! }
//! ```

pub mod buffer;
pub mod cache;
pub mod config;
pub mod error;
pub mod exec;
pub mod key;
pub mod manager;
pub mod resize;

// Re-export commonly used types
pub use buffer::{BufferId, BufferPool, ImageBuffer, Release, DEFAULT_MAX_RECYCLED_PER_SIZE};
pub use cache::{
    encode_png, DiskCache, DiskStore, MemoryCache, DEFAULT_DISK_CACHE_CAPACITY,
    DEFAULT_MEMORY_CACHE_CAPACITY,
};
pub use config::{default_cache_dir, Config, ManagerConfig, ModeArg};
pub use error::{IoError, LoadError, PoolError};
pub use exec::{Executor, Job, LocalQueue, RequestToken, TokenRegistry, WorkerPool, DEFAULT_WORKERS};
pub use key::CacheKey;
pub use manager::{callback_fn, LoadCallback, LoadMode, ManagerStats, PhotoManager, Stage};
pub use resize::{ImageResizer, Resizer, Transform, TransformOutput};
