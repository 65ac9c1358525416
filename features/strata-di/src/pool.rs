//! Worker pools for layer loading
//!
//! Large batches run on a bounded [ThreadPool], small batches get one short lived thread per task. Either way a
//! batch is awaited as a whole, results come back in submission order and panics become errors.

use std::{
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex, PoisonError},
    thread,
};

use futures::{executor::ThreadPool, future::join_all, task::SpawnExt};
use futures_channel::oneshot;

use crate::{errors::InitError, settings::ContainerSettings};

/// A named unit of work
pub(crate) struct Task<T> {
    label: String,
    work: Box<dyn FnOnce() -> T + Send>,
}
impl<T> Task<T> {
    pub(crate) fn new(label: impl Into<String>, work: impl FnOnce() -> T + Send + 'static) -> Self {
        Task {
            label: label.into(),
            work: Box::new(work),
        }
    }

    fn run(self) -> Result<T, InitError> {
        let Task { label, work } = self;
        catch_unwind(AssertUnwindSafe(work)).map_err(|_| {
            tracing::error!("Task for {label} panicked");
            InitError::TaskPanicked { product: label }
        })
    }
}

pub(crate) type BatchResult<T> = Result<Vec<Result<T, InitError>>, InitError>;

pub(crate) struct WorkerPools {
    size: usize,
    threshold: usize,
    /// Started on first use
    fixed: Mutex<Option<ThreadPool>>,
}
impl WorkerPools {
    pub(crate) fn new(settings: &ContainerSettings) -> Self {
        WorkerPools {
            size: settings.fixed_pool_size.max(1),
            threshold: settings.fixed_pool_threshold,
            fixed: Mutex::new(None),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    fn fixed_pool(&self) -> Result<ThreadPool, InitError> {
        let mut fixed = self.fixed.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = fixed.as_ref() {
            return Ok(pool.clone());
        }

        tracing::debug!("Starting fixed worker pool with {} threads", self.size);
        let pool = ThreadPool::builder()
            .pool_size(self.size)
            .name_prefix("strata-worker-")
            .create()
            .map_err(|e| InitError::PoolUnavailable(Arc::new(e)))?;
        *fixed = Some(pool.clone());
        Ok(pool)
    }

    /// Runs a batch, picking the pool by batch size
    pub(crate) async fn run_batch<T: Send + 'static>(&self, tasks: Vec<Task<T>>) -> BatchResult<T> {
        if tasks.len() >= self.threshold {
            self.run_fixed(tasks).await
        } else {
            self.run_threads(tasks).await
        }
    }

    /// Runs a batch on the fixed pool
    pub(crate) async fn run_fixed<T: Send + 'static>(&self, tasks: Vec<Task<T>>) -> BatchResult<T> {
        let pool = self.fixed_pool()?;

        let handles = tasks
            .into_iter()
            .map(|task| pool.spawn_with_handle(async move { task.run() }))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| InitError::PoolUnavailable(Arc::new(io::Error::other(e))))?;

        Ok(join_all(handles).await)
    }

    /// Runs every task on its own thread
    async fn run_threads<T: Send + 'static>(&self, tasks: Vec<Task<T>>) -> BatchResult<T> {
        let mut receivers = Vec::with_capacity(tasks.len());
        for task in tasks {
            let (tx, rx) = oneshot::channel();
            let label = task.label.clone();
            thread::Builder::new()
                .name(format!("strata-task-{label}"))
                .spawn(move || {
                    let _ = tx.send(task.run());
                })
                .map_err(|e| InitError::PoolUnavailable(Arc::new(e)))?;
            receivers.push(async move {
                // The sender only drops without sending if the thread died outside the task
                rx.await
                    .unwrap_or(Err(InitError::TaskPanicked { product: label }))
            });
        }

        Ok(join_all(receivers).await)
    }
}
