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

//! Service instance lifecycle.
//!
//! The server invoker never constructs service objects itself. For every
//! request it asks the service's [`ServiceFactory`] for an instance, invokes
//! the method, and hands the instance back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use wirecall_common::dispatch::DispatchQueue;
use wirecall_common::protocol::error::Result;

/// Supplies service instances to the server invoker.
pub trait ServiceFactory: Send + Sync + 'static {
    type Service: Send + Sync + 'static;

    /// Returns an instance to serve one request.
    fn get(&self) -> Result<Arc<Self::Service>>;

    /// Takes back an instance obtained from [`get`](Self::get).
    fn unget(&self, _instance: Arc<Self::Service>) {}

    /// The queue that calls on `instance` must run on, if any.
    ///
    /// Calls on a queue run one at a time in arrival order. Without a queue,
    /// blocking methods run on the shared worker pool.
    fn dispatch_queue(&self, _instance: &Self::Service) -> Option<DispatchQueue> {
        None
    }
}

/// Serves every request with the same instance.
///
/// # Example
///
/// ```
/// use wirecall_server::{ServiceFactory, SingletonFactory};
///
/// struct Greeter;
///
/// let factory = SingletonFactory::new(Greeter);
/// let a = factory.get().unwrap();
/// let b = factory.get().unwrap();
/// assert!(std::sync::Arc::ptr_eq(&a, &b));
/// ```
pub struct SingletonFactory<S> {
    instance: Arc<S>,
    queue: Option<DispatchQueue>,
}

impl<S> SingletonFactory<S> {
    pub fn new(service: S) -> Self {
        Self::from_arc(Arc::new(service))
    }

    pub fn from_arc(instance: Arc<S>) -> Self {
        Self {
            instance,
            queue: None,
        }
    }

    /// Runs every call on `queue`, serializing access to the instance.
    pub fn with_dispatch_queue(mut self, queue: DispatchQueue) -> Self {
        self.queue = Some(queue);
        self
    }
}

impl<S: Send + Sync + 'static> ServiceFactory for SingletonFactory<S> {
    type Service = S;

    fn get(&self) -> Result<Arc<S>> {
        Ok(self.instance.clone())
    }

    fn dispatch_queue(&self, _instance: &S) -> Option<DispatchQueue> {
        self.queue.clone()
    }
}

/// Creates instances on demand and keeps up to `max_idle` returned ones for
/// reuse.
pub struct PooledFactory<S> {
    create: Box<dyn Fn() -> S + Send + Sync>,
    idle: Mutex<Vec<Arc<S>>>,
    max_idle: usize,
    created: AtomicUsize,
}

impl<S> PooledFactory<S> {
    pub fn new<F>(max_idle: usize, create: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        Self {
            create: Box::new(create),
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
            created: AtomicUsize::new(0),
        }
    }

    /// Number of instances created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

impl<S: Send + Sync + 'static> ServiceFactory for PooledFactory<S> {
    type Service = S;

    fn get(&self) -> Result<Arc<S>> {
        if let Some(instance) = self.idle.lock().pop() {
            return Ok(instance);
        }
        let count = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(created = count, "creating pooled service instance");
        Ok(Arc::new((self.create)()))
    }

    fn unget(&self, instance: Arc<S>) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(instance);
        }
    }
}
