use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::trace;

use super::{Executor, Job, RequestToken};

/// Executor whose jobs run only when the owner drives it.
///
/// Jobs run one at a time, in the order they were scheduled, on whatever
/// task calls [`run_pending`](Self::run_pending). Jobs scheduled by a
/// running job are appended to the same queue.
#[derive(Default)]
pub struct LocalQueue {
    queue: Mutex<VecDeque<(RequestToken, Job)>>,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued jobs.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Number of queued jobs scheduled with `token`.
    pub fn pending_for(&self, token: RequestToken) -> usize {
        self.queue.lock().iter().filter(|(t, _)| *t == token).count()
    }

    /// Run the oldest queued job. Returns `false` if the queue was empty.
    pub async fn run_next(&self) -> bool {
        let next = self.queue.lock().pop_front();
        match next {
            Some((_, job)) => {
                job.await;
                true
            }
            None => false,
        }
    }

    /// Run jobs until the queue is empty, returning how many ran.
    pub async fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.run_next().await {
            ran += 1;
        }
        ran
    }
}

impl Executor for LocalQueue {
    fn schedule(&self, token: RequestToken, job: Job) {
        self.queue.lock().push_back((token, job));
    }

    fn cancel_all(&self, token: RequestToken) {
        let mut queue = self.queue.lock();
        let before = queue.len();
        queue.retain(|(t, _)| *t != token);
        trace!(removed = before - queue.len(), "Cancelled queued jobs");
    }
}

impl std::fmt::Debug for LocalQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalQueue")
            .field("pending", &self.len())
            .finish()
    }
}
