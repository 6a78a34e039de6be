use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug)]
struct Inner {
    name: &'static str,
    size: usize,
    semaphore: Semaphore,
    active: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicUsize,
}

/// Bounds how many units of work execute at the same time.
///
/// Submitted work never gets rejected: units beyond the pool size wait in the queue
/// until a running unit finishes.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

/// Point in time view of a [`WorkerPool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolMetrics {
    pub name: &'static str,
    pub size: usize,
    pub active: usize,
    pub queued: usize,
    pub completed: usize,
}

impl WorkerPool {
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.max(1);

        Self {
            inner: Arc::new(Inner {
                name,
                size,
                semaphore: Semaphore::new(size),
                active: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            }),
        }
    }

    /// Runs `future` as one unit of work once a worker is free.
    ///
    /// Counters stay consistent when the calling task is aborted while queued or running.
    pub async fn run<F>(&self, future: F) -> F::Output
    where
        F: Future,
    {
        let queued = CounterGuard::increment(&self.inner.queued);
        // The semaphore is never closed.
        let _permit = self.inner.semaphore.acquire().await.ok();
        drop(queued);

        let _active = CounterGuard::increment(&self.inner.active);
        let output = future.await;
        self.inner.completed.fetch_add(1, Ordering::Relaxed);

        output
    }

    /// Spawns `future` on the runtime as one unit of work of this pool.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let pool = self.clone();
        debug!(pool = pool.inner.name, "submitting work");

        tokio::spawn(async move { pool.run(future).await })
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            name: self.inner.name,
            size: self.inner.size,
            active: self.inner.active.load(Ordering::Relaxed),
            queued: self.inner.queued.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
        }
    }
}

struct CounterGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> CounterGuard<'a> {
    fn increment(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
