//! Bounded worker pool for sandboxed invocations
//!
//! The pool is constructed once and handed to the executor. Each submitted job
//! waits for a slot, then drives its own child processes; environment
//! variables the pool carries are applied to those children only.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::{ExecutorError, Result};

/// Environment applied to every child process started from the pool
pub const DEFAULT_CHILD_ENV: &[(&str, &str)] = &[("TOKENIZERS_PARALLELISM", "false")];

/// What a job receives when it gets a worker slot
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// Fires when the caller's outer deadline expires
    pub cancel: CancellationToken,
    /// Variables for child processes spawned by the job
    pub child_env: Arc<Vec<(String, String)>>,
}

impl WorkerContext {
    /// Context for work that runs on the caller's task instead of the pool
    pub fn detached() -> Self {
        Self {
            cancel: CancellationToken::new(),
            child_env: Arc::new(Vec::new()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    size: usize,
    child_env: Arc<Vec<(String, String)>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let child_env = DEFAULT_CHILD_ENV
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::with_child_env(size, child_env)
    }

    pub fn with_child_env(size: usize, child_env: Vec<(String, String)>) -> Self {
        let size = size.max(1);
        Self {
            slots: Arc::new(Semaphore::new(size)),
            size,
            child_env: Arc::new(child_env),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots not currently held by a running job
    pub fn idle(&self) -> usize {
        self.slots.available_permits()
    }

    /// Queue `job`; it starts once a slot is free.
    pub fn submit<F, Fut, T>(&self, job: F) -> PoolTask<T>
    where
        F: FnOnce(WorkerContext) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let cancel = CancellationToken::new();
        let ctx = WorkerContext {
            cancel: cancel.clone(),
            child_env: Arc::clone(&self.child_env),
        };
        let slots = Arc::clone(&self.slots);

        let handle = tokio::spawn(async move {
            let _slot = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    debug!("Job cancelled while waiting for a worker slot");
                    return None;
                }
                slot = slots.acquire_owned() => slot.ok()?,
            };
            Some(job(ctx).await)
        });

        PoolTask { handle, cancel }
    }
}

/// Handle to a submitted job. Dropping an unfinished task cancels it.
pub struct PoolTask<T> {
    handle: JoinHandle<Option<T>>,
    cancel: CancellationToken,
}

impl<T> PoolTask<T> {
    /// Signal the job to stop and kill whatever it is running
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the job's value
    pub async fn join(&mut self) -> Result<T> {
        match (&mut self.handle).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(ExecutorError::setup(
                "Worker pool job was cancelled before it started",
            )),
            Err(e) => Err(ExecutorError::setup(format!("Worker pool job failed: {}", e))),
        }
    }
}

impl<T> Drop for PoolTask<T> {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            self.cancel.cancel();
        }
    }
}
