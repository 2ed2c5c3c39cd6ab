//! Bounded worker pool for merge-time clustering.
//!
//! Clustering a term batch is CPU-bound (dense dot products per posting
//! entry), so merges fan batches out to a fixed set of worker threads and
//! drain results in submission order. The pool is created explicitly with
//! the configured thread quantity and joined on drop.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::trace;

use crate::error::{Result, SparseError};
use crate::settings::SparseSettings;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size worker pool executing boxed jobs.
pub struct ClusterWorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl ClusterWorkerPool {
    /// Spawn `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (sender, receiver) = unbounded::<Job>();
        let workers = (0..threads)
            .map(|worker| {
                let receiver: Receiver<Job> = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("seismic-cluster-{worker}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                        trace!(worker, "cluster worker exiting");
                    })
                    .expect("failed to spawn cluster worker thread")
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Pool sized by the configured merge-clustering thread quantity.
    pub fn from_settings(settings: &SparseSettings) -> Self {
        Self::new(settings.index_thread_qty)
    }

    /// Submit a task; the handle resolves when a worker finishes it.
    pub fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let job: Job = Box::new(move || {
            let _ = tx.send(task());
        });
        self.sender
            .as_ref()
            .expect("pool sender alive until drop")
            .send(job)
            .expect("cluster workers alive until drop");
        TaskHandle::Pending(rx)
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ClusterWorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets workers drain and exit.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// A pending or already-completed task result.
///
/// Batches that bypass the pool (`cluster_ratio == 0` runs inline) wrap
/// their output in [`TaskHandle::ready`] so the drain loop is uniform.
pub enum TaskHandle<T> {
    Pending(Receiver<T>),
    Ready(Option<T>),
}

impl<T> TaskHandle<T> {
    /// A handle that is already resolved.
    pub fn ready(value: T) -> Self {
        Self::Ready(Some(value))
    }

    /// Block until the result is available.
    pub fn join(self) -> Result<T> {
        match self {
            Self::Pending(rx) => rx
                .recv()
                .map_err(|_| SparseError::Invariant("cluster worker dropped its result".into())),
            Self::Ready(value) => value
                .ok_or_else(|| SparseError::Invariant("task handle already consumed".into())),
        }
    }
}
