//! Fixed-size worker pool over a bounded queue.
//!
//! Tasks are queued with [`WorkerPool::submit`], which only waits while the
//! queue is full. [`WorkerPool::join`] closes the queue and waits for every
//! worker to drain it, so once it returns each submitted task has either run
//! or been skipped. Tasks dequeued after the pool's cancellation token fires
//! are skipped rather than run. Dropping a pool without joining it aborts
//! its workers, along with any task they are running.

use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A unit of work executed by exactly one worker.
pub trait Task: Send + 'static {
    fn run(self, cancel: CancellationToken) -> BoxFuture<'static, ()>;

    /// Resolves the task without running it. Called for tasks dequeued
    /// after cancellation.
    fn skip(self);
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker pool {0} is closed")]
    Closed(String),
    #[error("Worker in pool {pool} panicked: {source}")]
    WorkerPanicked {
        pool: String,
        #[source]
        source: JoinError,
    },
}

pub struct WorkerPool<T> {
    name: String,
    sender: Option<mpsc::Sender<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Task> WorkerPool<T> {
    /// Spawns `workers` workers (at least one) sharing a queue of
    /// `capacity` slots (at least one).
    pub fn new(
        name: impl Into<String>,
        workers: usize,
        capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        let name = name.into();
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers: Vec<_> = (0..workers.max(1))
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let cancel = cancel.clone();
                let pool = name.clone();
                tokio::spawn(worker_loop(pool, id, receiver, cancel))
            })
            .collect();

        debug!(pool = %name, workers = workers.len(), capacity, "Worker pool started");

        Self {
            name,
            sender: Some(sender),
            workers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues `task`, waiting only while the queue is full.
    pub async fn submit(&self, task: T) -> Result<(), PoolError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| PoolError::Closed(self.name.clone()))?;

        sender
            .send(task)
            .await
            .map_err(|_| PoolError::Closed(self.name.clone()))
    }

    /// Stops accepting tasks. Workers exit once the queue drains.
    pub fn close(&mut self) {
        self.sender.take();
    }

    /// Closes the pool and waits for every worker to finish.
    pub async fn join(mut self) -> Result<(), PoolError> {
        self.close();

        let mut failure = None;
        for worker in self.workers.drain(..) {
            if let Err(source) = worker.await {
                failure.get_or_insert(PoolError::WorkerPanicked {
                    pool: self.name.clone(),
                    source,
                });
            }
        }

        debug!(pool = %self.name, "Worker pool drained");

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        debug!(pool = %self.name, workers = self.workers.len(), "Worker pool dropped, aborting");
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn worker_loop<T: Task>(
    pool: String,
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    cancel: CancellationToken,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(task) = next else {
            break;
        };

        if cancel.is_cancelled() {
            task.skip();
        } else {
            task.run(cancel.clone()).await;
        }
    }

    debug!(pool = %pool, worker = id, "Worker exiting");
}
