use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use wirecall_common::protocol::error::{Result, WirecallError};
use wirecall_common::protocol::wire::{self, CorrelationId};
use wirecall_common::transport::{Endpoint, Transport, TransportConfig, TransportId, TransportListener};

/// Transport pool configuration.
///
/// # Fields
///
/// - `pool_size`: Maximum number of transports per remote address
/// - `eviction_delay`: How long a transport may stay idle before it is closed
/// - `transport`: Configuration handed to every transport
///
/// # Default Configuration
///
/// - `pool_size`: 2
/// - `eviction_delay`: 5 minutes
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use wirecall_client::PoolConfig;
///
/// let config = PoolConfig::default()
///     .with_pool_size(4)
///     .with_eviction_delay(Duration::from_secs(30));
/// assert_eq!(config.pool_size, 4);
/// ```
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Maximum number of transports per remote address
    pub pool_size: usize,
    /// Idle time after which a transport is stopped
    pub eviction_delay: Duration,
    /// Per-transport configuration
    pub transport: TransportConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            eviction_delay: Duration::from_secs(5 * 60),
            transport: TransportConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn with_eviction_delay(mut self, delay: Duration) -> Self {
        self.eviction_delay = delay;
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

/// Receives the outcome of every message handed to a [`TransportPool`].
///
/// Each correlation id gets exactly one callback, unless it was withdrawn
/// with [`TransportPool::cancel`].
pub trait PoolOwner: Send + Sync + 'static {
    /// A response frame for `correlation_id` arrived.
    fn on_response(&self, correlation_id: CorrelationId, frame: Bytes);

    /// The message was lost: its transport failed or the pool stopped.
    fn on_request_failed(&self, correlation_id: CorrelationId, error: WirecallError);
}

/// Snapshot of a pool's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Transports owned by the pool, connecting ones included
    pub transports: usize,
    /// Transports with no queued output
    pub idle: usize,
    /// Messages waiting for an idle transport
    pub queued: usize,
    /// Messages sent and awaiting a response
    pub in_flight: usize,
}

struct PoolEntry {
    transport: Transport,
    /// Set while the transport has no queued output; refreshed by inbound
    /// traffic
    idle_since: Option<Instant>,
    /// An eviction timer task is running for this entry
    eviction_armed: bool,
    in_flight: HashSet<CorrelationId>,
}

impl PoolEntry {
    fn mark_busy(&mut self) {
        self.idle_since = None;
    }

    fn mark_idle(&mut self) {
        self.idle_since = Some(Instant::now());
    }

    fn evictable(&self) -> bool {
        self.idle_since.is_some() && self.in_flight.is_empty()
    }

    /// Claims the entry's eviction timer. Returns `true` if the caller must
    /// spawn it.
    fn arm_eviction(&mut self) -> bool {
        if self.eviction_armed || !self.evictable() {
            return false;
        }
        self.eviction_armed = true;
        true
    }
}

struct Queued {
    frame: Bytes,
    correlation_id: CorrelationId,
}

struct PoolState {
    entries: HashMap<TransportId, PoolEntry>,
    queue: VecDeque<Queued>,
    stopped: bool,
}

struct PoolShared {
    endpoint: Endpoint,
    config: PoolConfig,
    owner: Weak<dyn PoolOwner>,
    state: Mutex<PoolState>,
}

/// A bounded set of transports to one remote address.
///
/// Outbound frames go to an idle transport when there is one. Otherwise the
/// pool opens another transport (up to `pool_size`) and queues the frame;
/// queued frames are handed out in FIFO order whenever a transport signals
/// refill. Responses and failures are routed back to the [`PoolOwner`] by
/// correlation id. Idle transports are stopped after `eviction_delay`.
///
/// # Thread Safety
///
/// All bookkeeping sits behind one mutex that is never held across an
/// `.await` or a callback into the owner. Cloning is cheap.
#[derive(Clone)]
pub struct TransportPool {
    shared: Arc<PoolShared>,
}

impl TransportPool {
    /// Creates an empty pool. Transports are opened on demand.
    pub fn new(endpoint: Endpoint, config: PoolConfig, owner: Weak<dyn PoolOwner>) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                endpoint,
                config,
                owner,
                state: Mutex::new(PoolState {
                    entries: HashMap::new(),
                    queue: VecDeque::new(),
                    stopped: false,
                }),
            }),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    /// Submits a request frame.
    ///
    /// # Errors
    ///
    /// Returns `Stopped` if the pool has been stopped. Later failures are
    /// reported through [`PoolOwner::on_request_failed`].
    pub fn offer(&self, frame: Bytes, correlation_id: CorrelationId) -> Result<()> {
        let started = {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return Err(WirecallError::Stopped);
            }

            if let Some(entry) = state.entries.values_mut().find(|e| e.idle_since.is_some()) {
                let accepted = entry.transport.offer(frame.clone());
                entry.mark_busy();
                if accepted {
                    entry.in_flight.insert(correlation_id);
                    return Ok(());
                }
            }

            state.queue.push_back(Queued {
                frame,
                correlation_id,
            });

            if state.entries.len() < self.shared.config.pool_size {
                let transport = Transport::new(
                    self.shared.endpoint.clone(),
                    self.shared.config.transport.clone(),
                    Arc::new(PoolListener {
                        pool: Arc::downgrade(&self.shared),
                    }),
                );
                state.entries.insert(
                    transport.id(),
                    PoolEntry {
                        transport: transport.clone(),
                        idle_since: None,
                        eviction_armed: false,
                        in_flight: HashSet::new(),
                    },
                );
                Some(transport)
            } else {
                None
            }
        };

        if let Some(transport) = started {
            debug!(transport = transport.id(), peer = %self.shared.endpoint, "opening pooled transport");
            tokio::spawn(async move {
                // Failures reach the pool through the listener
                let _ = transport.start().await;
            });
        }
        Ok(())
    }

    /// Forgets `correlation_id`, typically after the caller timed out.
    ///
    /// A queued frame is discarded; a frame already sent stays on the wire
    /// and its response, if any, is dropped by the owner.
    pub fn cancel(&self, correlation_id: CorrelationId) {
        let eviction = {
            let mut state = self.shared.state.lock();
            let before = state.queue.len();
            state.queue.retain(|q| q.correlation_id != correlation_id);
            if state.queue.len() != before {
                return;
            }
            let mut eviction = None;
            for (id, entry) in state.entries.iter_mut() {
                if entry.in_flight.remove(&correlation_id) {
                    eviction = entry.arm_eviction().then_some(*id);
                    break;
                }
            }
            eviction
        };
        // The withdrawn id may have been all that kept an idle transport
        if let Some(transport_id) = eviction {
            self.shared.schedule_eviction(transport_id);
        }
    }

    /// Stops every transport and fails all outstanding messages with
    /// `Stopped`. Returns once every transport has shut down.
    pub async fn stop(&self) {
        let (transports, failed) = {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            let mut failed: Vec<CorrelationId> = Vec::new();
            let mut transports = Vec::with_capacity(state.entries.len());
            for (_, entry) in state.entries.drain() {
                failed.extend(entry.in_flight);
                transports.push(entry.transport);
            }
            failed.extend(state.queue.drain(..).map(|q| q.correlation_id));
            (transports, failed)
        };

        join_all(transports.iter().map(|t| t.stop())).await;
        info!(peer = %self.shared.endpoint, transports = transports.len(), "transport pool stopped");

        if let Some(owner) = self.shared.owner.upgrade() {
            for correlation_id in failed {
                owner.on_request_failed(correlation_id, WirecallError::Stopped);
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            transports: state.entries.len(),
            idle: state
                .entries
                .values()
                .filter(|e| e.idle_since.is_some())
                .count(),
            queued: state.queue.len(),
            in_flight: state.entries.values().map(|e| e.in_flight.len()).sum(),
        }
    }
}

impl PoolShared {
    fn handle_frame(self: &Arc<Self>, transport_id: TransportId, frame: Bytes) {
        let correlation_id = match wire::peek_correlation_id(&frame) {
            Ok(id) => id,
            Err(e) => {
                warn!(transport = transport_id, "dropping response without correlation id: {}", e);
                return;
            }
        };

        let arm = {
            let mut state = self.state.lock();
            match state.entries.get_mut(&transport_id) {
                Some(entry) => {
                    entry.in_flight.remove(&correlation_id);
                    // Inbound traffic refreshes an idle transport
                    if entry.idle_since.is_some() {
                        entry.mark_idle();
                    }
                    entry.arm_eviction()
                }
                None => false,
            }
        };
        if arm {
            self.schedule_eviction(transport_id);
        }

        if let Some(owner) = self.owner.upgrade() {
            owner.on_response(correlation_id, frame);
        }
    }

    fn handle_refill(self: &Arc<Self>, transport: &Transport) {
        let arm = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.stopped {
                return;
            }
            let Some(entry) = state.entries.get_mut(&transport.id()) else {
                return;
            };

            let mut sent = 0;
            while let Some(next) = state.queue.front() {
                if !transport.offer(next.frame.clone()) {
                    break;
                }
                if let Some(q) = state.queue.pop_front() {
                    entry.in_flight.insert(q.correlation_id);
                }
                sent += 1;
            }

            if sent == 0 && state.queue.is_empty() {
                entry.mark_idle();
                entry.arm_eviction()
            } else {
                entry.mark_busy();
                false
            }
        };

        if arm {
            self.schedule_eviction(transport.id());
        }
    }

    fn handle_failure(&self, transport_id: TransportId, error: WirecallError) {
        let (entry, orphaned) = {
            let mut state = self.state.lock();
            let Some(entry) = state.entries.remove(&transport_id) else {
                return;
            };
            let orphaned: Vec<CorrelationId> = if state.entries.is_empty() {
                state.queue.drain(..).map(|q| q.correlation_id).collect()
            } else {
                Vec::new()
            };
            (entry, orphaned)
        };

        debug!(
            transport = transport_id,
            in_flight = entry.in_flight.len(),
            queued = orphaned.len(),
            "removing failed transport from pool: {}",
            error
        );

        if let Some(owner) = self.owner.upgrade() {
            for correlation_id in entry.in_flight.iter().chain(orphaned.iter()) {
                owner.on_request_failed(*correlation_id, error.clone());
            }
        }

        let transport = entry.transport;
        tokio::spawn(async move { transport.stop().await });
    }

    /// Runs the entry's single eviction timer. The timer sleeps until the
    /// entry's idle deadline, re-reading it on every wake since inbound
    /// traffic moves it, and exits once the entry is busy or awaiting
    /// responses; the entry re-arms it when it becomes evictable again.
    fn schedule_eviction(self: &Arc<Self>, transport_id: TransportId) {
        let pool = Arc::downgrade(self);
        let mut deadline = Instant::now() + self.config.eviction_delay;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep_until(deadline).await;
                let Some(shared) = pool.upgrade() else {
                    return;
                };
                match shared.evict_if_idle(transport_id) {
                    Some(next) => deadline = next,
                    None => return,
                }
            }
        });
    }

    /// Evicts the entry if its idle deadline has passed. Returns the new
    /// deadline when the entry was refreshed in the meantime.
    fn evict_if_idle(&self, transport_id: TransportId) -> Option<Instant> {
        let transport = {
            let mut state = self.state.lock();
            let entry = state.entries.get_mut(&transport_id)?;
            let idle_since = match entry.idle_since {
                Some(since) if entry.in_flight.is_empty() => since,
                _ => {
                    entry.eviction_armed = false;
                    return None;
                }
            };
            let deadline = idle_since + self.config.eviction_delay;
            if Instant::now() < deadline {
                return Some(deadline);
            }
            state.entries.remove(&transport_id)?.transport
        };

        debug!(transport = transport_id, peer = %self.endpoint, "evicting idle transport");
        tokio::spawn(async move { transport.stop().await });
        None
    }
}

struct PoolListener {
    pool: Weak<PoolShared>,
}

impl TransportListener for PoolListener {
    fn on_frame(&self, transport: &Transport, frame: Bytes) {
        if let Some(pool) = self.pool.upgrade() {
            pool.handle_frame(transport.id(), frame);
        }
    }

    fn on_refill(&self, transport: &Transport) {
        if let Some(pool) = self.pool.upgrade() {
            pool.handle_refill(transport);
        }
    }

    fn on_failure(&self, transport: &Transport, error: &WirecallError) {
        if let Some(pool) = self.pool.upgrade() {
            pool.handle_failure(transport.id(), error.clone());
        }
    }

    fn on_disconnected(&self, transport: &Transport) {
        if let Some(pool) = self.pool.upgrade() {
            pool.handle_failure(transport.id(), WirecallError::ConnectionClosed);
        }
    }
}
