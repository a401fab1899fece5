//! Two-tier buffer caching.
//!
//! ```text
//! request ──► MemoryCache (decoded RGBA, LRU by bytes)
//!                 │ miss
//!                 ▼
//!             DiskStore (encoded PNG, LRU by bytes)
//!                 │ miss
//!                 ▼
//!             Resizer (decode + transform from source)
//! ```
//!
//! - [`MemoryCache`]: synchronous, owned by the manager's lock, reports every
//!   departing entry through an eviction callback.
//! - [`DiskStore`]: async trait consulted from background jobs;
//!   [`DiskCache`] is the directory-backed implementation.

mod disk;
mod memory;

pub use disk::{encode_png, DiskCache, DiskStore, DEFAULT_DISK_CACHE_CAPACITY};
pub use memory::{MemoryCache, DEFAULT_MEMORY_CACHE_CAPACITY};
