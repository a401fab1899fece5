use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::{debug, error};

use super::{Executor, Job, RequestToken};

/// Default number of jobs run concurrently.
pub const DEFAULT_WORKERS: usize = 4;

enum Command {
    Schedule(RequestToken, Job),
    Cancel(RequestToken),
}

/// Counts jobs that are queued or running.
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self, n: usize) {
        if n > 0 && self.count.fetch_sub(n, Ordering::SeqCst) == n {
            self.idle.notify_waiters();
        }
    }
}

/// Tokio-backed executor running up to `workers` jobs at once.
///
/// A dispatcher task owns the FIFO of queued jobs. Schedule and cancel
/// requests travel over one channel, so a cancel always observes every job
/// scheduled before it. Jobs are dispatched as soon as a worker slot frees
/// up; a job that already left the queue is not affected by a later cancel.
pub struct WorkerPool {
    tx: mpsc::UnboundedSender<Command>,
    pending: Arc<Pending>,
    workers: usize,
}

impl WorkerPool {
    /// Start a pool on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(workers));
        let pending = Arc::new(Pending::default());

        tokio::spawn(run_dispatcher(rx, semaphore, pending.clone()));
        debug!(workers, "Started worker pool");

        Self {
            tx,
            pending,
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of jobs queued or running.
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Wait until no job is queued or running.
    ///
    /// Jobs scheduled by a running job are counted before that job
    /// finishes, so a chain of follow-up stages is awaited as a whole.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.pending.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl Executor for WorkerPool {
    fn schedule(&self, token: RequestToken, job: Job) {
        self.pending.add();
        if self.tx.send(Command::Schedule(token, job)).is_err() {
            self.pending.finish(1);
            error!("Worker pool dispatcher stopped, dropping job");
        }
    }

    fn cancel_all(&self, token: RequestToken) {
        if self.tx.send(Command::Cancel(token)).is_err() {
            error!("Worker pool dispatcher stopped, cannot cancel");
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

async fn run_dispatcher(
    mut rx: mpsc::UnboundedReceiver<Command>,
    semaphore: Arc<Semaphore>,
    pending: Arc<Pending>,
) {
    let mut queue: VecDeque<(RequestToken, Job)> = VecDeque::new();

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    Some(Command::Schedule(token, job)) => queue.push_back((token, job)),
                    Some(Command::Cancel(token)) => {
                        let before = queue.len();
                        queue.retain(|(t, _)| *t != token);
                        let removed = before - queue.len();
                        pending.finish(removed);
                        debug!(removed, "Cancelled queued jobs");
                    }
                    None => break,
                }
            }
            Ok(permit) = semaphore.clone().acquire_owned(), if !queue.is_empty() => {
                if let Some((_, job)) = queue.pop_front() {
                    let pending = pending.clone();
                    tokio::spawn(async move {
                        job.await;
                        drop(permit);
                        pending.finish(1);
                    });
                }
            }
        }
    }

    pending.finish(queue.len());
    debug!(dropped = queue.len(), "Worker pool dispatcher exiting");
}
