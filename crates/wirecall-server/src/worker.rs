use std::sync::Arc;

use tokio::sync::Semaphore;
use wirecall_common::protocol::error::{Result, WirecallError};

/// Bounded pool for blocking service methods.
///
/// At most `size` jobs run at once, each on a runtime blocking thread;
/// further jobs wait for a permit.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Available parallelism times four, and never less than four.
    pub fn default_size() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .saturating_mul(4)
            .max(4)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by a running job.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `job` once a permit is free and returns its result.
    ///
    /// # Errors
    ///
    /// Returns `TaskFailed` if the job panicked.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WirecallError::Stopped)?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| WirecallError::TaskFailed(e.to_string()))
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(Self::default_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_default_size_has_floor() {
        assert!(WorkerPool::default_size() >= 4);
        assert_eq!(WorkerPool::new(0).size(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs = (0..8).map(|_| {
            let pool = pool.clone();
            let running = running.clone();
            let peak = peak.clone();
            async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }
        });
        for result in futures::future::join_all(jobs).await {
            result.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_panicking_job_reports_task_failure() {
        let pool = WorkerPool::new(1);
        let err = pool.run(|| panic!("boom")).await.unwrap_err();
        assert!(matches!(err, WirecallError::TaskFailed(_)));
        // The permit was released
        assert_eq!(pool.run(|| 7).await.unwrap(), 7);
    }
}
