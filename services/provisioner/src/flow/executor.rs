//! Bounded worker pool for flows.
//!
//! A fixed number of workers drain one bounded FIFO queue. Submitting to a
//! full queue is rejected instead of growing the queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// A unit of work run by the executor.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// The queue is full.
    #[error("flow queue is full")]
    Saturated,

    #[error("flow executor is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 40,
            queue_capacity: 4000,
        }
    }
}

pub struct FlowExecutor {
    tx: mpsc::Sender<Job>,
    shutdown_tx: watch::Sender<bool>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    capacity: usize,
}

impl FlowExecutor {
    /// Spawns the workers. Must be called inside a Tokio runtime.
    pub fn start(config: ExecutorConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel::<Job>(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(worker, rx.clone(), shutdown_rx.clone()))
            })
            .collect();

        info!(
            workers = config.workers.max(1),
            queue_capacity = capacity,
            "flow executor started"
        );
        Self {
            tx,
            shutdown_tx,
            workers: std::sync::Mutex::new(workers),
            capacity,
        }
    }

    /// Queues `job` without waiting for room.
    pub fn submit(&self, job: Job) -> Result<(), ExecutorError> {
        if *self.shutdown_tx.borrow() {
            return Err(ExecutorError::ShuttingDown);
        }
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ExecutorError::Saturated,
            mpsc::error::TrySendError::Closed(_) => ExecutorError::ShuttingDown,
        })
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_saturated(&self) -> bool {
        self.tx.capacity() == 0
    }

    /// Stops accepting work and waits for the workers to finish their
    /// current job. Queued jobs that have not started are dropped.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let workers = std::mem::take(&mut *crate::locked(&self.workers));
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "flow worker ended abnormally");
            }
        }
        info!("flow executor stopped");
    }
}

impl std::fmt::Debug for FlowExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowExecutor")
            .field("capacity", &self.capacity)
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let job = {
            let mut rx = rx.lock().await;
            // Shutdown may have started while this worker waited for the
            // receiver; queued jobs must not start after it.
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = job else {
            break;
        };

        // A panicking job must not take the worker down with it.
        if let Err(e) = tokio::spawn(job).await {
            error!(worker, error = %e, "flow job panicked");
        }
    }
    debug!(worker, "flow worker stopped");
}
