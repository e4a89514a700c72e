use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use wirecall_common::protocol::error::{Result, WirecallError};
use wirecall_common::protocol::wire::{self, CorrelationId, FrameBuilder};
use wirecall_common::protocol::{MethodSignature, SerializationStrategy, WireArgs};
use wirecall_common::transport::Endpoint;

use crate::pool::{PoolConfig, PoolOwner, PoolStats, TransportPool};
use crate::proxy::ServiceProxy;

/// Client invoker configuration.
///
/// # Default Configuration
///
/// - `request_timeout`: 2 minutes
/// - `pool`: [`PoolConfig::default`]
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// How long a request waits for its response
    pub request_timeout: Duration,
    /// Configuration of each per-address transport pool
    pub pool: PoolConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            pool: PoolConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

/// How the caller receives a method's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationMode {
    /// The calling task awaits the result
    Blocking,
    /// The call returns at once; a trailing callback receives the result
    Async,
}

/// Per-method data computed once and cached by the invoker.
#[derive(Debug)]
pub struct MethodData {
    pub signature: MethodSignature,
    pub strategy: SerializationStrategy,
    pub mode: InvocationMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MethodKey {
    name: String,
    args: TypeId,
    strategy: Option<String>,
    mode: InvocationMode,
}

struct PendingRequest {
    completion: oneshot::Sender<Result<Bytes>>,
    created_at: Instant,
}

struct ClientShared {
    config: ClientConfig,
    next_id: AtomicU64,
    pending: Mutex<HashMap<CorrelationId, PendingRequest>>,
    pools: Mutex<HashMap<Endpoint, TransportPool>>,
    methods: Mutex<HashMap<MethodKey, Arc<MethodData>>>,
    stopped: AtomicBool,
}

impl PoolOwner for ClientShared {
    fn on_response(&self, correlation_id: CorrelationId, frame: Bytes) {
        let pending = self.pending.lock().remove(&correlation_id);
        match pending {
            Some(request) => {
                debug!(
                    correlation_id,
                    elapsed_ms = request.created_at.elapsed().as_millis() as u64,
                    "response received"
                );
                let _ = request.completion.send(Ok(frame));
            }
            None => debug!(correlation_id, "dropping response for unknown correlation id"),
        }
    }

    fn on_request_failed(&self, correlation_id: CorrelationId, error: WirecallError) {
        let pending = self.pending.lock().remove(&correlation_id);
        if let Some(request) = pending {
            debug!(correlation_id, "request failed: {}", error);
            let _ = request.completion.send(Err(error));
        }
    }
}

/// Removes a pending request when its caller stops waiting, whether it
/// completed, timed out or was dropped.
struct PendingGuard<'a> {
    shared: &'a ClientShared,
    pool: &'a TransportPool,
    correlation_id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let abandoned = self.shared.pending.lock().remove(&self.correlation_id).is_some();
        if abandoned {
            self.pool.cancel(self.correlation_id);
        }
    }
}

/// Client side of Wirecall.
///
/// The invoker assigns correlation ids, encodes requests, hands them to a
/// per-address [`TransportPool`] and routes responses back to the waiting
/// callers. Typed calls go through a [`ServiceProxy`]; [`invoke`](Self::invoke)
/// is the untyped-by-proxy entry point.
///
/// Cloning is cheap; all clones share pools, pending requests and the
/// method cache.
///
/// # Example
///
/// ```no_run
/// use wirecall_client::{ClientConfig, ClientInvoker};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let invoker = ClientInvoker::new(ClientConfig::default());
/// let echo = invoker.proxy("tcp://127.0.0.1:7000", "echo")?;
///
/// let method = echo.method::<(String,), String>("echo")?;
/// let reply = method.call(("hi".to_string(),)).await?;
/// assert_eq!(reply, "hi");
///
/// invoker.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ClientInvoker {
    shared: Arc<ClientShared>,
}

impl ClientInvoker {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                config,
                next_id: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                pools: Mutex::new(HashMap::new()),
                methods: Mutex::new(HashMap::new()),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Returns a proxy for the service `service_id` at `address`.
    ///
    /// # Arguments
    ///
    /// * `address` - Remote address, `tcp://host:port`
    /// * `service_id` - Identifier the service was registered under
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` if `address` cannot be parsed.
    pub fn proxy(&self, address: &str, service_id: impl Into<String>) -> Result<ServiceProxy> {
        let endpoint = Endpoint::parse(address)?;
        Ok(ServiceProxy::new(self.clone(), endpoint, service_id.into()))
    }

    /// Calls `method` of `service` at `address` and waits for the result.
    ///
    /// Uses the default serialization strategy.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use wirecall_client::{ClientConfig, ClientInvoker};
    /// # async fn run() -> wirecall_common::Result<()> {
    /// let invoker = ClientInvoker::new(ClientConfig::default());
    /// let sum: i64 = invoker
    ///     .invoke("tcp://127.0.0.1:7000", "calculator", "add", (2i64, 3i64))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn invoke<A, R>(&self, address: &str, service: &str, method: &str, args: A) -> Result<R>
    where
        A: WireArgs + 'static,
        R: DeserializeOwned,
    {
        let endpoint = Endpoint::parse(address)?;
        let data = self.method_data::<A>(method, None, InvocationMode::Blocking)?;
        let (correlation_id, frame) = self.prepare(service, &data, &args)?;
        self.dispatch(&endpoint, correlation_id, frame, &data).await
    }

    /// Returns the cached method data, computing it on first use.
    pub(crate) fn method_data<A: WireArgs + 'static>(
        &self,
        name: &str,
        strategy: Option<&str>,
        mode: InvocationMode,
    ) -> Result<Arc<MethodData>> {
        let key = MethodKey {
            name: name.to_string(),
            args: TypeId::of::<A>(),
            strategy: strategy.map(str::to_string),
            mode,
        };
        if let Some(data) = self.shared.methods.lock().get(&key) {
            return Ok(data.clone());
        }

        let data = Arc::new(MethodData {
            signature: MethodSignature::of::<A>(name),
            strategy: SerializationStrategy::resolve(strategy)?,
            mode,
        });
        Ok(self
            .shared
            .methods
            .lock()
            .entry(key)
            .or_insert(data)
            .clone())
    }

    /// Assigns a correlation id and encodes the request frame.
    pub(crate) fn prepare<A: Serialize>(
        &self,
        service: &str,
        data: &MethodData,
        args: &A,
    ) -> Result<(CorrelationId, Bytes)> {
        if self.is_stopped() {
            return Err(WirecallError::ClientStopped);
        }
        let correlation_id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let mut builder = FrameBuilder::request(correlation_id, service, data.signature.as_str());
        data.strategy.encode_args(args, builder.payload_mut())?;
        Ok((correlation_id, builder.finish()?))
    }

    /// Sends a prepared frame and waits for the decoded result.
    pub(crate) async fn dispatch<R: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        correlation_id: CorrelationId,
        frame: Bytes,
        data: &MethodData,
    ) -> Result<R> {
        let pool = self.pool_for(endpoint)?;
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(
            correlation_id,
            PendingRequest {
                completion: tx,
                created_at: Instant::now(),
            },
        );
        let _guard = PendingGuard {
            shared: &self.shared,
            pool: &pool,
            correlation_id,
        };

        if self.is_stopped() {
            return Err(WirecallError::ClientStopped);
        }
        pool.offer(frame, correlation_id)?;
        debug!(correlation_id, peer = %endpoint, method = %data.signature, "request sent");

        let timeout = self.shared.config.request_timeout;
        let frame = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome?,
            Ok(Err(_)) => return Err(WirecallError::ClientStopped),
            Err(_) => {
                warn!(correlation_id, peer = %endpoint, method = %data.signature, "request timed out");
                return Err(WirecallError::Timeout(timeout.as_millis() as u64));
            }
        };

        let (_, payload) = wire::decode_response(frame)?;
        data.strategy
            .decode_result::<R>(&payload)?
            .map_err(WirecallError::Remote)
    }

    fn pool_for(&self, endpoint: &Endpoint) -> Result<TransportPool> {
        let mut pools = self.shared.pools.lock();
        if self.is_stopped() {
            return Err(WirecallError::ClientStopped);
        }
        let shared: Weak<ClientShared> = Arc::downgrade(&self.shared);
        let owner: Weak<dyn PoolOwner> = shared;
        Ok(pools
            .entry(endpoint.clone())
            .or_insert_with(|| {
                debug!(peer = %endpoint, "creating transport pool");
                TransportPool::new(endpoint.clone(), self.shared.config.pool.clone(), owner)
            })
            .clone())
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Pool statistics for `address`, if a pool exists for it.
    pub fn pool_stats(&self, address: &str) -> Option<PoolStats> {
        let endpoint = Endpoint::parse(address).ok()?;
        self.shared.pools.lock().get(&endpoint).map(|pool| pool.stats())
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Fails every pending request with `ClientStopped` and stops all pools.
    ///
    /// Requests issued afterwards fail immediately.
    pub async fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let pending: Vec<PendingRequest> = self
            .shared
            .pending
            .lock()
            .drain()
            .map(|(_, request)| request)
            .collect();
        let failed = pending.len();
        for request in pending {
            let _ = request.completion.send(Err(WirecallError::ClientStopped));
        }

        let pools: Vec<TransportPool> = self.shared.pools.lock().drain().map(|(_, p)| p).collect();
        join_all(pools.iter().map(|pool| pool.stop())).await;
        info!(pools = pools.len(), failed, "client invoker stopped");
    }
}
