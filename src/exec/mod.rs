//! Background execution substrate.
//!
//! The manager never runs disk or decode work itself. It packages each step
//! as a [`Job`] and hands it to an [`Executor`] together with the
//! [`RequestToken`] of the request it belongs to. Cancelling a token removes
//! every queued job carrying it; jobs that already started run to completion.
//!
//! Two executors are provided:
//!
//! - [`WorkerPool`]: a Tokio dispatcher that runs up to N jobs concurrently.
//! - [`LocalQueue`]: jobs wait until the owner drives the queue, which suits
//!   a single-threaded UI loop and deterministic tests.

mod local;
mod token;
mod worker;

use futures::future::BoxFuture;

pub use local::LocalQueue;
pub use token::{RequestToken, TokenRegistry};
pub use worker::{WorkerPool, DEFAULT_WORKERS};

/// A unit of deferred work.
pub type Job = BoxFuture<'static, ()>;

/// Schedules jobs and cancels them by token.
pub trait Executor: Send + Sync + 'static {
    /// Queue `job` on behalf of `token`.
    fn schedule(&self, token: RequestToken, job: Job);

    /// Drop every queued job scheduled with `token`.
    ///
    /// Safe to call at any time, including when nothing is queued.
    fn cancel_all(&self, token: RequestToken);
}
