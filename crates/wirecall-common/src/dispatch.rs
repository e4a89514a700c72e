// Copyright 2025 Wirecall Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Serialized task execution.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::protocol::error::{Result, WirecallError};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A named queue that runs blocking closures one at a time, in submission
/// order, on the runtime's blocking pool.
///
/// Distinct queues run in parallel. Cloning yields another handle to the
/// same queue; the queue task ends once every handle is dropped and the
/// backlog has been run.
///
/// Must be created from within a Tokio runtime.
///
/// # Example
///
/// ```
/// use wirecall_common::dispatch::DispatchQueue;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let queue = DispatchQueue::new("accounts");
/// let total = queue.run(|| 40 + 2).await.unwrap();
/// assert_eq!(total, 42);
/// # });
/// ```
#[derive(Clone)]
pub struct DispatchQueue {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Task>,
}

impl DispatchQueue {
    pub fn new(name: impl Into<String>) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();

        let queue_name = name.clone();
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                if let Err(e) = tokio::task::spawn_blocking(task).await {
                    error!(queue = %queue_name, "dispatch task failed: {}", e);
                }
            }
            debug!(queue = %queue_name, "dispatch queue drained");
        });

        Self { name, tx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues a closure without waiting for it.
    pub fn execute<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(Box::new(task))
            .map_err(|_| WirecallError::Stopped)
    }

    /// Enqueues a closure and waits for its result.
    pub async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.execute(move || {
            let _ = tx.send(task());
        })?;
        rx.await
            .map_err(|_| WirecallError::TaskFailed(format!("task on queue '{}' did not complete", self.name)))
    }
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_tasks_run_in_submission_order() {
        let queue = DispatchQueue::new("ordered");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let seen = seen.clone();
            queue
                .execute(move || {
                    // Early tasks are slower; order must still hold
                    if i < 5 {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    seen.lock().push(i);
                })
                .unwrap();
        }
        queue.run(|| ()).await.unwrap();

        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stop_queue() {
        let queue = DispatchQueue::new("resilient");
        let result = queue.run(|| -> u32 { panic!("boom") }).await;
        assert!(matches!(result, Err(WirecallError::TaskFailed(_))));
        assert_eq!(queue.run(|| 7).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_name() {
        let queue = DispatchQueue::new("named");
        assert_eq!(queue.name(), "named");
        assert_eq!(queue.clone().name(), "named");
    }
}
