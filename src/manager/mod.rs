//! Request coordination.
//!
//! [`PhotoManager`] is the entry point. Each request runs the lookup chain
//! memory cache → disk cache → resizer, recycling buffers of the requested
//! size when the buffer pool has one free.
//!
//! # Components
//!
//! - [`PhotoManager`]: request API, cancellation, buffer references, stats
//! - [`LoadCallback`]: receives one outcome per request; [`callback_fn`]
//!   adapts a pair of closures
//! - [`LoadMode`]: which transform a request applies
//! - [`ManagerStats`]: serializable counters and resource gauges

mod callback;
mod request;
mod service;

pub use callback::{callback_fn, LoadCallback};
pub use request::{LoadMode, Stage};
pub use service::{ManagerStats, PhotoManager};
