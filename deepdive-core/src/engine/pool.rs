//! Bounded worker pool.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::FlowError;

/// Runs closures on at most `max_workers` concurrent tokio tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Apply `f` to every item concurrently and return the results in input
    /// order. A worker that panics fails the whole call.
    pub async fn map<I, O, F, Fut>(
        &self,
        label: &str,
        items: Vec<I>,
        f: F,
    ) -> Result<Vec<O>, FlowError>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: Fn(I) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
    {
        debug!(
            pool = label,
            items = items.len(),
            max_workers = self.max_workers,
            "Dispatching work items"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let sem = semaphore.clone();
            let f = f.clone();
            handles.push(tokio::spawn(async move {
                // The semaphore is never closed, so acquire cannot fail.
                let _permit = sem.acquire_owned().await.ok();
                f(item).await
            }));
        }

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| {
                joined.map_err(|e| FlowError::WorkerFailed {
                    node: label.to_string(),
                    message: e.to_string(),
                })
            })
            .collect()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(4)
    }
}

/// How a node runs its per-item work: in place, one after another, or on a
/// worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fanout {
    Sequential,
    Parallel(WorkerPool),
}

impl Fanout {
    pub fn from_config(parallel: bool, max_workers: usize) -> Self {
        if parallel {
            Fanout::Parallel(WorkerPool::new(max_workers))
        } else {
            Fanout::Sequential
        }
    }

    /// Same contract as [`WorkerPool::map`]; the sequential form never fails.
    pub async fn map<I, O, F, Fut>(
        &self,
        label: &str,
        items: Vec<I>,
        f: F,
    ) -> Result<Vec<O>, FlowError>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: Fn(I) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
    {
        match self {
            Fanout::Sequential => {
                let mut results = Vec::with_capacity(items.len());
                for item in items {
                    results.push(f(item).await);
                }
                Ok(results)
            }
            Fanout::Parallel(pool) => pool.map(label, items, f).await,
        }
    }
}
