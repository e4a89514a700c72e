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

//! Server Invoker
//!
//! Accepts connections, resolves each request frame to a registered service
//! method, runs it, and writes the response frame back on the connection the
//! request arrived on.
//!
//! # Request Handling
//!
//! 1. Decode correlation id, service id and signature
//! 2. Look up the service, then the method by raw signature bytes
//! 3. Get an instance from the service's factory
//! 4. Run the method: on the factory's dispatch queue if it has one, else on
//!    the worker pool (blocking methods) or as a task (async methods)
//! 5. Return the instance to the factory and send the response
//!
//! Requests that cannot be resolved or decoded are logged and dropped; the
//! caller observes a timeout.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use wirecall_common::protocol::error::{Result, WirecallError};
use wirecall_common::protocol::wire::{self, FrameBuilder, RequestHeader};
use wirecall_common::rate_limit::RateLimitConfig;
use wirecall_common::transport::{
    AcceptHandler, Transport, TransportConfig, TransportId, TransportListener, TransportServer,
};

use crate::definition::{Handler, ServiceDefinition};
use crate::service::ServiceFactory;
use crate::worker::WorkerPool;

/// Server invoker configuration.
///
/// # Default Configuration
///
/// - `transport`: [`TransportConfig::default`]
/// - `worker_threads`: [`WorkerPool::default_size`]
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Configuration of every accepted transport
    pub transport: TransportConfig,
    /// Maximum number of blocking methods running at once
    pub worker_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            worker_threads: WorkerPool::default_size(),
        }
    }
}

impl ServerConfig {
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.transport = self.transport.with_rate_limit(rate_limit);
        self
    }
}

/// A registered service with its concrete types erased.
trait RegisteredService: Send + Sync {
    /// Prepares the call for `signature`, or `None` if the service has no
    /// such method.
    fn invoke(
        &self,
        signature: &[u8],
        args: Bytes,
        response: FrameBuilder,
        workers: &WorkerPool,
    ) -> Option<BoxFuture<'static, Result<Bytes>>>;
}

struct Registered<F: ServiceFactory> {
    factory: Arc<F>,
    definition: ServiceDefinition<F::Service>,
}

impl<F: ServiceFactory> RegisteredService for Registered<F> {
    fn invoke(
        &self,
        signature: &[u8],
        args: Bytes,
        response: FrameBuilder,
        workers: &WorkerPool,
    ) -> Option<BoxFuture<'static, Result<Bytes>>> {
        let entry = self.definition.lookup(signature)?;
        let factory = self.factory.clone();
        let workers = workers.clone();

        Some(
            async move {
                let instance = factory.get()?;
                let queue = factory.dispatch_queue(&instance);

                let response = match &entry.handler {
                    Handler::Blocking(handler) => {
                        let handler = handler.clone();
                        let service = instance.clone();
                        let job = move || -> Result<FrameBuilder> {
                            let mut response = response;
                            handler(&service, &args, &mut response)?;
                            Ok(response)
                        };
                        match queue {
                            Some(queue) => queue.run(job).await.and_then(|r| r),
                            None => workers.run(job).await.and_then(|r| r),
                        }
                    }
                    Handler::Async(handler) => {
                        let call = handler(instance.clone(), args, response);
                        match queue {
                            Some(queue) => {
                                let runtime = tokio::runtime::Handle::current();
                                queue.run(move || runtime.block_on(call)).await.and_then(|r| r)
                            }
                            None => tokio::spawn(call)
                                .await
                                .map_err(|e| WirecallError::TaskFailed(e.to_string()))
                                .and_then(|r| r),
                        }
                    }
                };

                factory.unget(instance);
                response?.finish()
            }
            .boxed(),
        )
    }
}

/// Frames that did not fit into a connection's output queue.
///
/// Responses complete out of order on worker threads; the outbox keeps them
/// in completion order and retries when the transport signals refill.
#[derive(Default)]
struct Outbox {
    backlog: Mutex<VecDeque<Bytes>>,
}

impl Outbox {
    fn send(&self, transport: &Transport, frame: Bytes) {
        if !transport.is_connected() {
            debug!(transport = transport.id(), "dropping response for closed connection");
            return;
        }
        let mut backlog = self.backlog.lock();
        if backlog.is_empty() && transport.offer(frame.clone()) {
            return;
        }
        backlog.push_back(frame);
    }

    fn drain(&self, transport: &Transport) {
        let mut backlog = self.backlog.lock();
        while let Some(frame) = backlog.front() {
            if !transport.offer(frame.clone()) {
                break;
            }
            backlog.pop_front();
        }
    }

    fn clear(&self) {
        self.backlog.lock().clear();
    }
}

struct InvokerShared {
    config: ServerConfig,
    services: RwLock<HashMap<String, Arc<dyn RegisteredService>>>,
    workers: WorkerPool,
    connections: Mutex<HashMap<TransportId, Transport>>,
    server: Mutex<Option<Arc<TransportServer>>>,
    stopped: AtomicBool,
}

impl InvokerShared {
    /// Finds the method `header` addresses and prepares its call.
    fn resolve(
        &self,
        header: &RequestHeader,
        args: Bytes,
    ) -> Result<BoxFuture<'static, Result<Bytes>>> {
        let service = self
            .services
            .read()
            .get(&header.service)
            .cloned()
            .ok_or_else(|| WirecallError::ServiceNotFound(header.service.clone()))?;
        let response = FrameBuilder::response(header.correlation_id);
        service
            .invoke(&header.signature, args, response, &self.workers)
            .ok_or_else(|| WirecallError::MethodNotFound {
                service: header.service.clone(),
                signature: header.signature_lossy(),
            })
    }

    fn handle_request(&self, transport: &Transport, outbox: &Arc<Outbox>, frame: Bytes) {
        let (header, args) = match wire::decode_request(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(transport = transport.id(), "dropping undecodable request: {}", e);
                return;
            }
        };
        let correlation_id = header.correlation_id;

        let call = match self.resolve(&header, args) {
            Ok(call) => call,
            Err(e) => {
                warn!(correlation_id, transport = transport.id(), "dropping request: {}", e);
                return;
            }
        };
        debug!(correlation_id, service = %header.service, "dispatching request");

        let transport = transport.clone();
        let outbox = outbox.clone();
        tokio::spawn(async move {
            match call.await {
                Ok(frame) => outbox.send(&transport, frame),
                Err(e) => warn!(correlation_id, "dropping request: {}", e),
            }
        });
    }
}

/// Turns accepted sockets into served connections.
struct Acceptor {
    invoker: Weak<InvokerShared>,
}

impl AcceptHandler for Acceptor {
    fn connection_listener(&self, peer: SocketAddr) -> Arc<dyn TransportListener> {
        Arc::new(ConnectionListener {
            invoker: self.invoker.clone(),
            outbox: Arc::new(Outbox::default()),
            peer,
        })
    }

    fn on_accept(&self, transport: Transport) {
        let Some(invoker) = self.invoker.upgrade() else {
            return;
        };
        {
            let mut connections = invoker.connections.lock();
            if invoker.stopped.load(Ordering::SeqCst) {
                // Dropping the unstarted transport closes the socket
                return;
            }
            connections.insert(transport.id(), transport.clone());
        }
        tokio::spawn(async move {
            // Failures reach the listener
            let _ = transport.start().await;
        });
    }
}

struct ConnectionListener {
    invoker: Weak<InvokerShared>,
    outbox: Arc<Outbox>,
    peer: SocketAddr,
}

impl TransportListener for ConnectionListener {
    fn on_connected(&self, transport: &Transport) {
        debug!(transport = transport.id(), peer = %self.peer, "client connected");
    }

    fn on_frame(&self, transport: &Transport, frame: Bytes) {
        if let Some(invoker) = self.invoker.upgrade() {
            invoker.handle_request(transport, &self.outbox, frame);
        }
    }

    fn on_refill(&self, transport: &Transport) {
        self.outbox.drain(transport);
    }

    fn on_failure(&self, transport: &Transport, error: &WirecallError) {
        debug!(transport = transport.id(), peer = %self.peer, "connection failed: {}", error);
    }

    fn on_disconnected(&self, transport: &Transport) {
        self.outbox.clear();
        if let Some(invoker) = self.invoker.upgrade() {
            invoker.connections.lock().remove(&transport.id());
        }
        debug!(transport = transport.id(), peer = %self.peer, "client disconnected");
    }
}

/// Server side of Wirecall.
///
/// Holds the service registry and serves it on one listening address.
/// Cloning is cheap; clones share the registry and connections.
///
/// # Example
///
/// ```no_run
/// use wirecall_server::{ServerConfig, ServerInvoker, ServiceDefinition, SingletonFactory};
/// use wirecall_common::Fault;
///
/// struct Echo;
///
/// # #[tokio::main]
/// # async fn main() -> wirecall_common::Result<()> {
/// let invoker = ServerInvoker::new(ServerConfig::default());
/// invoker.register_service(
///     "echo",
///     SingletonFactory::new(Echo),
///     ServiceDefinition::new()
///         .method("echo", |_: &Echo, (text,): (String,)| Ok::<_, Fault>(text)),
/// );
///
/// let addr = invoker.listen("127.0.0.1:7000").await?;
/// println!("serving on {}", addr);
/// # invoker.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ServerInvoker {
    shared: Arc<InvokerShared>,
}

impl ServerInvoker {
    pub fn new(config: ServerConfig) -> Self {
        let workers = WorkerPool::new(config.worker_threads);
        Self {
            shared: Arc::new(InvokerShared {
                config,
                services: RwLock::new(HashMap::new()),
                workers,
                connections: Mutex::new(HashMap::new()),
                server: Mutex::new(None),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Registers a service under `id`, replacing any service registered
    /// under the same id.
    ///
    /// Requests already running against a replaced service finish normally.
    pub fn register_service<F: ServiceFactory>(
        &self,
        id: impl Into<String>,
        factory: F,
        definition: ServiceDefinition<F::Service>,
    ) {
        let id = id.into();
        let methods = definition.len();
        let registered: Arc<dyn RegisteredService> = Arc::new(Registered {
            factory: Arc::new(factory),
            definition,
        });
        let replaced = self
            .shared
            .services
            .write()
            .insert(id.clone(), registered)
            .is_some();
        if replaced {
            warn!(service = %id, "replacing registered service");
        }
        info!(service = %id, methods, "service registered");
    }

    /// Removes the service registered under `id`. Returns whether one was.
    pub fn unregister_service(&self, id: &str) -> bool {
        let removed = self.shared.services.write().remove(id).is_some();
        if removed {
            info!(service = %id, "service unregistered");
        }
        removed
    }

    /// Identifiers of all registered services, sorted.
    pub fn service_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.services.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Starts accepting connections on `bind_addr` and returns the bound
    /// address.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the invoker is already listening or was stopped
    /// - `Connection` if the address cannot be bound
    pub async fn listen(&self, bind_addr: &str) -> Result<SocketAddr> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(WirecallError::InvalidState("server invoker is stopped".to_string()));
        }
        if self.shared.server.lock().is_some() {
            return Err(WirecallError::InvalidState(
                "server invoker is already listening".to_string(),
            ));
        }

        let acceptor = Arc::new(Acceptor {
            invoker: Arc::downgrade(&self.shared),
        });
        let server =
            TransportServer::bind(bind_addr, self.shared.config.transport.clone(), acceptor).await?;
        let addr = server.local_addr();

        let server = Arc::new(server);
        let raced = {
            let mut slot = self.shared.server.lock();
            if slot.is_some() || self.shared.stopped.load(Ordering::SeqCst) {
                true
            } else {
                *slot = Some(server.clone());
                false
            }
        };
        if raced {
            server.stop().await;
            return Err(WirecallError::InvalidState(
                "server invoker stopped or started listening concurrently".to_string(),
            ));
        }

        info!(addr = %addr, workers = self.shared.workers.size(), "server invoker listening");
        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.server.lock().as_ref().map(|s| s.local_addr())
    }

    /// Number of live client connections.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    /// Stops accepting, then closes every connection. Methods still running
    /// complete, but their responses are discarded.
    pub async fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let server = self.shared.server.lock().take();
        if let Some(server) = server {
            server.stop().await;
        }

        let connections: Vec<Transport> = self
            .shared
            .connections
            .lock()
            .drain()
            .map(|(_, transport)| transport)
            .collect();
        join_all(connections.iter().map(|t| t.stop())).await;
        info!(connections = connections.len(), "server invoker stopped");
    }
}
