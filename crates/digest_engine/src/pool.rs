use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("worker pool closed")]
pub struct PoolClosed;

/// Process-wide bound on concurrently executing fetch and render/commit work.
///
/// Cloning shares the same permits. Permits are released when the
/// returned guard drops.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    semaphore: Semaphore,
    limit: usize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl WorkerPool {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            inner: Arc::new(PoolInner {
                semaphore: Semaphore::new(limit),
                limit,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Number of permits currently held.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Highest number of permits ever held at once.
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    pub async fn acquire(&self) -> Result<WorkerPermit<'_>, PoolClosed> {
        let permit = self.inner.semaphore.acquire().await.map_err(|_| PoolClosed)?;
        let now = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);
        Ok(WorkerPermit {
            _permit: permit,
            active: &self.inner.active,
        })
    }

    /// Refuse new work. Waiters and later `acquire` calls get `PoolClosed`.
    pub fn close(&self) {
        self.inner.semaphore.close();
    }
}

#[derive(Debug)]
pub struct WorkerPermit<'a> {
    _permit: SemaphorePermit<'a>,
    active: &'a AtomicUsize,
}

impl Drop for WorkerPermit<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
