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

//! Per-service method tables.
//!
//! A [`ServiceDefinition`] maps method signatures to typed handlers. It is
//! built once, handed to the server invoker at registration, and looked up
//! by the raw signature bytes of each incoming request.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tracing::warn;
use wirecall_common::protocol::error::Result;
use wirecall_common::protocol::wire::FrameBuilder;
use wirecall_common::protocol::{Fault, MethodSignature, SerializationStrategy, WireArgs};

/// Decodes arguments, calls the method and encodes its outcome into the
/// response frame.
pub(crate) type BlockingHandler<S> =
    dyn Fn(&S, &[u8], &mut FrameBuilder) -> Result<()> + Send + Sync;

/// Async counterpart of [`BlockingHandler`]; yields the filled frame.
pub(crate) type AsyncHandler<S> =
    dyn Fn(Arc<S>, Bytes, FrameBuilder) -> BoxFuture<'static, Result<FrameBuilder>> + Send + Sync;

pub(crate) enum Handler<S> {
    Blocking(Arc<BlockingHandler<S>>),
    Async(Arc<AsyncHandler<S>>),
}

pub(crate) struct MethodEntry<S> {
    pub(crate) signature: MethodSignature,
    pub(crate) strategy: SerializationStrategy,
    pub(crate) handler: Handler<S>,
}

/// The callable methods of a service of type `S`.
///
/// Methods are keyed by their signature, `name(<type codes>)`, which the
/// argument tuple type determines. Handlers return `Result<R, Fault>`; a
/// `Fault` travels back to the caller as an application error.
///
/// # Example
///
/// ```
/// use wirecall_server::ServiceDefinition;
/// use wirecall_common::Fault;
///
/// struct Calculator;
///
/// let definition = ServiceDefinition::<Calculator>::new()
///     .method("add", |_: &Calculator, (a, b): (i64, i64)| Ok::<_, Fault>(a + b))
///     .method("div", |_: &Calculator, (a, b): (i64, i64)| {
///         if b == 0 {
///             return Err(Fault::new("InvalidInput", "divide by zero"));
///         }
///         Ok(a / b)
///     });
///
/// assert!(definition.contains("add(JJ)"));
/// assert_eq!(definition.len(), 2);
/// ```
pub struct ServiceDefinition<S> {
    methods: HashMap<Bytes, Arc<MethodEntry<S>>>,
}

impl<S: Send + Sync + 'static> ServiceDefinition<S> {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Adds a blocking method using the default strategy.
    pub fn method<A, R, F>(self, name: &str, f: F) -> Self
    where
        A: WireArgs + 'static,
        R: Serialize + 'static,
        F: Fn(&S, A) -> std::result::Result<R, Fault> + Send + Sync + 'static,
    {
        self.method_with_strategy(name, SerializationStrategy::default(), f)
    }

    /// Adds a blocking method whose arguments and result use `strategy`.
    pub fn method_with_strategy<A, R, F>(
        self,
        name: &str,
        strategy: SerializationStrategy,
        f: F,
    ) -> Self
    where
        A: WireArgs + 'static,
        R: Serialize + 'static,
        F: Fn(&S, A) -> std::result::Result<R, Fault> + Send + Sync + 'static,
    {
        let handler = move |service: &S, args: &[u8], response: &mut FrameBuilder| -> Result<()> {
            let args: A = strategy.decode_args(args)?;
            let outcome = f(service, args);
            strategy.encode_result(&outcome, response.payload_mut())
        };
        self.insert(MethodEntry {
            signature: MethodSignature::of::<A>(name),
            strategy,
            handler: Handler::Blocking(Arc::new(handler)),
        })
    }

    /// Adds a method that runs as a runtime task instead of on a worker
    /// thread.
    pub fn async_method<A, R, F, Fut>(self, name: &str, f: F) -> Self
    where
        A: WireArgs + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, Fault>> + Send + 'static,
    {
        self.async_method_with_strategy(name, SerializationStrategy::default(), f)
    }

    pub fn async_method_with_strategy<A, R, F, Fut>(
        self,
        name: &str,
        strategy: SerializationStrategy,
        f: F,
    ) -> Self
    where
        A: WireArgs + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, Fault>> + Send + 'static,
    {
        let f = Arc::new(f);
        let handler = move |service: Arc<S>, args: Bytes, mut response: FrameBuilder| {
            let f = f.clone();
            async move {
                let args: A = strategy.decode_args(&args)?;
                let outcome = f(service, args).await;
                strategy.encode_result(&outcome, response.payload_mut())?;
                Ok(response)
            }
            .boxed()
        };
        self.insert(MethodEntry {
            signature: MethodSignature::of::<A>(name),
            strategy,
            handler: Handler::Async(Arc::new(handler)),
        })
    }

    fn insert(mut self, entry: MethodEntry<S>) -> Self {
        let key = Bytes::copy_from_slice(entry.signature.as_bytes());
        if self.methods.insert(key, Arc::new(entry)).is_some() {
            warn!("method registered twice; keeping the later definition");
        }
        self
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.methods.contains_key(signature.as_bytes())
    }

    pub fn signatures(&self) -> impl Iterator<Item = &MethodSignature> {
        self.methods.values().map(|entry| &entry.signature)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub(crate) fn lookup(&self, signature: &[u8]) -> Option<Arc<MethodEntry<S>>> {
        self.methods.get(signature).cloned()
    }
}

impl<S: Send + Sync + 'static> Default for ServiceDefinition<S> {
    fn default() -> Self {
        Self::new()
    }
}
