//! Bounded-concurrency execution of a set of async tasks.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs tasks with at most `limit` of them in flight at once.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `worker` over every item. Tasks queue on the semaphore until a
    /// permit frees up; the worker is only invoked once its permit is held.
    ///
    /// Results line up with the input order whatever the completion order.
    /// A failed task releases its permit and its error is returned in its
    /// slot.
    pub async fn run<I, T, F, Fut>(&self, items: I, worker: F) -> Vec<Result<T>>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let worker = &worker;
        let tasks = items.into_iter().map(|item| {
            let semaphore = self.semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .context("concurrency limiter closed")?;
                worker(item).await
            }
        });

        join_all(tasks).await
    }
}
