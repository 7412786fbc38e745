//! Per-window serial job queue.
//!
//! Each window gets one worker task draining an unbounded mpsc channel, so
//! jobs for one window run strictly in submission order and never overlap,
//! while jobs for different windows proceed independently. Exclusion comes
//! from the queue shape; no lock is held across a job.

use futures::FutureExt;
use futures::future::BoxFuture;
use ringtale_core::window::WindowId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

type Job = BoxFuture<'static, ()>;

/// Serializes async jobs per window.
#[derive(Default)]
pub struct SerialQueue {
    workers: Mutex<HashMap<WindowId, mpsc::UnboundedSender<Job>>>,
}

impl SerialQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `job` behind every job already submitted for `window`.
    ///
    /// The receiver yields the job's output once it has run. Dropping the
    /// receiver does not cancel the job. Must be called inside a Tokio
    /// runtime.
    pub fn submit<F, T>(&self, window: &WindowId, job: F) -> oneshot::Receiver<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut job: Job = async move {
            let out = job.await;
            let _ = tx.send(out);
        }
        .boxed();

        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        // A worker whose job panicked has gone away; replace it once.
        for _ in 0..2 {
            let sender = workers
                .entry(window.clone())
                .or_insert_with(|| spawn_worker(window.clone()));
            match sender.send(job) {
                Ok(()) => break,
                Err(mpsc::error::SendError(returned)) => {
                    debug!(window = %window, "Serial worker gone, respawning");
                    workers.remove(window);
                    job = returned;
                }
            }
        }
        rx
    }

    /// Wait until every job submitted for `window` so far has finished.
    pub async fn flush(&self, window: &WindowId) {
        let _ = self.submit(window, async {}).await;
    }

    /// Number of windows with a live worker.
    pub fn active_windows(&self) -> usize {
        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers.values().filter(|tx| !tx.is_closed()).count()
    }
}

fn spawn_worker(window: WindowId) -> mpsc::UnboundedSender<Job> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    tokio::spawn(async move {
        debug!(window = %window, "Serial worker started");
        while let Some(job) = rx.recv().await {
            job.await;
        }
    });
    tx
}
