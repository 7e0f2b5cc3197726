//! Per-key ordered execution.
//!
//! Jobs submitted under the same key (a relative path) run one at a time in
//! submission order; jobs for different keys run concurrently. Each active
//! key has one worker task, which retires once its queue is empty.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

type Job = BoxFuture<'static, ()>;
type Workers = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>>;

#[derive(Clone, Default)]
pub struct OrderedExecutor {
    workers: Workers,
}

impl OrderedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `job` behind any unfinished jobs for `key`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<Fut>(&self, key: &str, job: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut job: Job = Box::pin(job);
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(tx) = workers.get(key) {
            match tx.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    // Worker task is gone; start a fresh one
                    warn!("Worker for {} exited unexpectedly, restarting", key);
                    workers.remove(key);
                    job = returned;
                }
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        // Fresh channel with a live receiver
        let _ = tx.send(job);
        workers.insert(key.to_string(), tx);
        drop(workers);

        debug!("Starting worker for {}", key);
        tokio::spawn(Self::run(key.to_string(), rx, Arc::clone(&self.workers)));
    }

    /// Number of keys with queued or running jobs.
    pub fn active(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Wait until every queued job has finished, or `timeout` elapses.
    /// Returns whether the executor went idle.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.active() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    async fn run(key: String, mut rx: mpsc::UnboundedReceiver<Job>, workers: Workers) {
        while let Some(job) = rx.recv().await {
            if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                error!("Job for {} panicked", key);
            }

            // Retire under the map lock so a concurrent submit either lands
            // before the emptiness check or starts a new worker.
            let mut workers = workers.lock().unwrap_or_else(|e| e.into_inner());
            if rx.is_empty() {
                workers.remove(&key);
                debug!("Worker for {} idle, retiring", key);
                return;
            }
        }
    }
}
