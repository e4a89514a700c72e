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

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::protocol::error::{Result, WirecallError};
use crate::rate_limit::{RateLimitConfig, Throttle};
use crate::transport::address::Endpoint;
use crate::transport::codec::{
    ByteSink, ByteSource, FlushState, FrameCodec, FrameDecoder, FrameEncoder, WriteState,
    DEFAULT_HIGH_WATER_MARK, MAX_FRAME_SIZE,
};

/// Default number of inbound bytes decoded per read wakeup (64 KiB)
pub const DEFAULT_READ_BUDGET: usize = 64 * 1024;

/// Process-unique transport identifier, used as a map key by owners.
pub type TransportId = u64;

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Configuration shared by all transports of a pool or server.
///
/// # Example
///
/// ```
/// use wirecall_common::transport::TransportConfig;
/// use wirecall_common::rate_limit::RateLimitConfig;
///
/// let config = TransportConfig::default()
///     .with_high_water_mark(256 * 1024)
///     .with_rate_limit(RateLimitConfig::per_second(None, Some(1 << 20)));
/// assert_eq!(config.high_water_mark, 256 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Queued output at which `offer` starts refusing frames
    pub high_water_mark: usize,
    /// Largest inbound frame accepted
    pub max_frame_size: usize,
    /// Inbound bytes decoded per wakeup before yielding
    pub read_budget: usize,
    /// Disable Nagle's algorithm on connected sockets
    pub nodelay: bool,
    /// Optional byte-rate caps
    pub rate_limit: RateLimitConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            max_frame_size: MAX_FRAME_SIZE,
            read_budget: DEFAULT_READ_BUDGET,
            nodelay: true,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl TransportConfig {
    pub fn with_high_water_mark(mut self, bytes: usize) -> Self {
        self.high_water_mark = bytes;
        self
    }

    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    pub fn with_read_budget(mut self, bytes: usize) -> Self {
        self.read_budget = bytes;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

/// Externally requested lifecycle of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Starting,
    Started,
    Stopping,
    Stopped,
}

/// State of the underlying socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Disconnected,
    Connecting,
    Connected,
    /// Cancellation requested; `pending` I/O tasks have not exited yet
    Canceling { pending: usize },
    Canceled,
}

/// Receives transport events.
///
/// Callbacks run on the transport's I/O tasks with no transport lock held,
/// so they may call back into the transport (for example `offer` from
/// `on_refill`). They must not block.
pub trait TransportListener: Send + Sync + 'static {
    /// The socket is connected and I/O is registered.
    fn on_connected(&self, _transport: &Transport) {}

    /// A complete inbound frame, length prefix included.
    fn on_frame(&self, transport: &Transport, frame: Bytes);

    /// The transport can take more output: sent after connect and whenever
    /// queued output has been fully drained.
    fn on_refill(&self, _transport: &Transport) {}

    /// An I/O or framing failure. Reported at most once per connection.
    fn on_failure(&self, _transport: &Transport, _error: &WirecallError) {}

    /// The socket has been closed and every I/O task has exited.
    fn on_disconnected(&self, _transport: &Transport) {}
}

enum Origin {
    /// Dialed by a pool; can be restarted
    Dial(Endpoint),
    /// Accepted by a server; the stream is consumed by the first start
    Accepted(Option<TcpStream>),
}

struct Lifecycle {
    service: ServiceState,
    socket: SocketState,
    origin: Origin,
    stream: Option<Arc<TcpStream>>,
    io_tasks: usize,
    cancel: CancellationToken,
    failure_reported: bool,
    start_waiters: Vec<oneshot::Sender<Result<()>>>,
    stop_waiters: Vec<oneshot::Sender<()>>,
}

struct Shared {
    id: TransportId,
    peer: String,
    config: TransportConfig,
    listener: Arc<dyn TransportListener>,
    lifecycle: Mutex<Lifecycle>,
    encoder: Mutex<FrameEncoder>,
    write_armed: Notify,
    throttle: Mutex<Throttle>,
    read_resumed: Notify,
    write_resumed: Notify,
}

/// One framed, non-blocking TCP connection.
///
/// A transport owns its socket and codec and drives two state machines: the
/// service state (start/stop requests) and the socket state (connect,
/// cancel). Inbound frames and flow-control signals are delivered to a
/// [`TransportListener`]. Cloning yields another handle to the same
/// connection.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use bytes::Bytes;
/// use wirecall_common::transport::{Endpoint, Transport, TransportConfig, TransportListener};
///
/// struct Print;
///
/// impl TransportListener for Print {
///     fn on_frame(&self, _transport: &Transport, frame: Bytes) {
///         println!("{} byte frame", frame.len());
///     }
/// }
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let endpoint = Endpoint::parse("tcp://127.0.0.1:9000").unwrap();
/// let transport = Transport::connect(endpoint, TransportConfig::default(), Arc::new(Print))
///     .await
///     .unwrap();
/// transport.stop().await;
/// # });
/// ```
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
}

impl Transport {
    /// Creates a transport that dials `endpoint` when started.
    pub fn new(
        endpoint: Endpoint,
        config: TransportConfig,
        listener: Arc<dyn TransportListener>,
    ) -> Self {
        let peer = endpoint.authority();
        Self::build(peer, Origin::Dial(endpoint), config, listener)
    }

    /// Wraps an accepted stream. Starting it registers I/O without dialing.
    pub fn from_stream(
        stream: TcpStream,
        config: TransportConfig,
        listener: Arc<dyn TransportListener>,
    ) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self::build(peer, Origin::Accepted(Some(stream)), config, listener)
    }

    /// Creates and starts a transport connected to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns a `Connection` error if the connection cannot be established.
    pub async fn connect(
        endpoint: Endpoint,
        config: TransportConfig,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Self> {
        let transport = Self::new(endpoint, config, listener);
        transport.start().await?;
        Ok(transport)
    }

    fn build(
        peer: String,
        origin: Origin,
        config: TransportConfig,
        listener: Arc<dyn TransportListener>,
    ) -> Self {
        let codec = FrameCodec::new(config.high_water_mark, config.max_frame_size);
        let throttle = Throttle::new(&config.rate_limit);
        Self {
            shared: Arc::new(Shared {
                id: NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed),
                peer,
                listener,
                lifecycle: Mutex::new(Lifecycle {
                    service: ServiceState::Created,
                    socket: SocketState::Disconnected,
                    origin,
                    stream: None,
                    io_tasks: 0,
                    cancel: CancellationToken::new(),
                    failure_reported: false,
                    start_waiters: Vec::new(),
                    stop_waiters: Vec::new(),
                }),
                encoder: Mutex::new(codec.encoder),
                write_armed: Notify::new(),
                throttle: Mutex::new(throttle),
                read_resumed: Notify::new(),
                write_resumed: Notify::new(),
                config,
            }),
        }
    }

    pub fn id(&self) -> TransportId {
        self.shared.id
    }

    /// Remote `host:port`.
    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    pub fn service_state(&self) -> ServiceState {
        self.shared.lifecycle.lock().service
    }

    pub fn socket_state(&self) -> SocketState {
        self.shared.lifecycle.lock().socket
    }

    pub fn is_connected(&self) -> bool {
        self.socket_state() == SocketState::Connected
    }

    /// Output bytes queued and not yet written to the socket.
    pub fn pending_output(&self) -> usize {
        self.shared.encoder.lock().pending_bytes()
    }

    /// Starts the transport, connecting if it was created with an endpoint.
    ///
    /// Concurrent calls while a start is in progress wait for the same
    /// outcome. Starting a started transport is a no-op.
    ///
    /// # Errors
    ///
    /// * `InvalidState` - the transport is stopping, or is an accepted
    ///   connection that was already stopped
    /// * `Connection` - the connection attempt failed
    /// * `Stopped` - a stop was requested before the connection completed
    pub async fn start(&self) -> Result<()> {
        let rx = {
            let mut lc = self.shared.lifecycle.lock();
            match lc.service {
                ServiceState::Started => return Ok(()),
                ServiceState::Stopping => {
                    warn!(transport = self.id(), "start rejected while stopping");
                    return Err(WirecallError::InvalidState(
                        "cannot start a transport while it is stopping".to_string(),
                    ));
                }
                ServiceState::Starting => {}
                ServiceState::Created | ServiceState::Stopped => {
                    if matches!(lc.origin, Origin::Accepted(None)) {
                        warn!(transport = self.id(), "start rejected for a closed accepted connection");
                        return Err(WirecallError::InvalidState(
                            "accepted connection cannot be restarted".to_string(),
                        ));
                    }
                    lc.service = ServiceState::Starting;
                    lc.socket = SocketState::Connecting;
                    lc.cancel = CancellationToken::new();
                    lc.failure_reported = false;
                    let transport = self.clone();
                    let cancel = lc.cancel.clone();
                    tokio::spawn(async move { transport.run_start(cancel).await });
                }
            }
            let (tx, rx) = oneshot::channel();
            lc.start_waiters.push(tx);
            rx
        };
        rx.await.map_err(|_| WirecallError::Stopped)?
    }

    /// Stops the transport and waits until the socket is closed and every
    /// I/O task has exited. Queued output is discarded.
    ///
    /// Stopping a stopped transport is a no-op. Stopping one that was never
    /// started moves it straight to `Stopped`; an accepted connection then
    /// closes its socket and can no longer be started.
    pub async fn stop(&self) {
        let (rx, cancel_now) = {
            let mut lc = self.shared.lifecycle.lock();
            let cancel_now = match lc.service {
                ServiceState::Stopped => return,
                ServiceState::Created => {
                    // Never started: nothing to cancel, but an accepted
                    // stream must not be served by a later start
                    if let Origin::Accepted(stream) = &mut lc.origin {
                        stream.take();
                    }
                    lc.service = ServiceState::Stopped;
                    lc.socket = SocketState::Canceled;
                    return;
                }
                ServiceState::Starting => {
                    lc.cancel.cancel();
                    false
                }
                ServiceState::Stopping => false,
                ServiceState::Started => {
                    lc.service = ServiceState::Stopping;
                    true
                }
            };
            let (tx, rx) = oneshot::channel();
            lc.stop_waiters.push(tx);
            (rx, cancel_now)
        };
        if cancel_now {
            self.begin_cancel(None);
        }
        let _ = rx.await;
    }

    /// Queues a complete frame for output.
    ///
    /// Returns `false` if the socket is not connected or the output queue is
    /// at its high-water mark; the caller keeps the frame and retries after
    /// the next refill signal.
    pub fn offer(&self, frame: Bytes) -> bool {
        if self.shared.lifecycle.lock().socket != SocketState::Connected {
            return false;
        }
        match self.shared.encoder.lock().write(frame) {
            WriteState::Full => false,
            WriteState::Accepted { was_empty } => {
                if was_empty {
                    self.shared.write_armed.notify_one();
                }
                true
            }
        }
    }

    async fn run_start(self, cancel: CancellationToken) {
        let dial = {
            let mut lc = self.shared.lifecycle.lock();
            match &mut lc.origin {
                Origin::Dial(endpoint) => Ok(endpoint.authority()),
                Origin::Accepted(stream) => Err(stream.take()),
            }
        };

        let stream = match dial {
            Err(Some(stream)) => stream,
            Err(None) => {
                return self.start_failed(WirecallError::InvalidState(
                    "accepted connection cannot be restarted".to_string(),
                ))
            }
            Ok(authority) => {
                debug!(transport = self.id(), peer = %authority, "connecting");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return self.start_failed(WirecallError::Stopped),
                    result = TcpStream::connect(&authority) => match result {
                        Ok(stream) => stream,
                        Err(e) => {
                            return self.start_failed(WirecallError::Connection(format!(
                                "failed to connect to {}: {}",
                                authority, e
                            )))
                        }
                    },
                }
            }
        };

        if self.shared.config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(transport = self.id(), "failed to set TCP_NODELAY: {}", e);
            }
        }

        let stream = Arc::new(stream);
        let (encoder, decoder) =
            FrameCodec::new(self.shared.config.high_water_mark, self.shared.config.max_frame_size)
                .into_parts();
        *self.shared.encoder.lock() = encoder;
        *self.shared.throttle.lock() = Throttle::new(&self.shared.config.rate_limit);

        let waiters = {
            let mut lc = self.shared.lifecycle.lock();
            if cancel.is_cancelled() {
                drop(lc);
                return self.start_failed(WirecallError::Stopped);
            }
            lc.socket = SocketState::Connected;
            lc.service = ServiceState::Started;
            lc.stream = Some(stream.clone());
            lc.io_tasks = 2;
            std::mem::take(&mut lc.start_waiters)
        };

        self.spawn_io(self.clone().read_loop(stream.clone(), decoder, cancel.clone()));
        self.spawn_io(self.clone().write_loop(stream, cancel.clone()));
        if self.shared.config.rate_limit.is_limited() {
            let interval = self.shared.config.rate_limit.interval;
            tokio::spawn(self.clone().throttle_loop(interval, cancel));
        }

        info!(transport = self.id(), peer = %self.peer(), "transport connected");
        for waiter in waiters {
            let _ = waiter.send(Ok(()));
        }
        self.shared.listener.on_connected(&self);
        self.shared.listener.on_refill(&self);
    }

    fn start_failed(&self, err: WirecallError) {
        let (start_waiters, stop_waiters, report) = {
            let mut lc = self.shared.lifecycle.lock();
            lc.socket = SocketState::Canceled;
            lc.service = ServiceState::Stopped;
            let report = !lc.failure_reported && !matches!(err, WirecallError::Stopped);
            lc.failure_reported = true;
            (
                std::mem::take(&mut lc.start_waiters),
                std::mem::take(&mut lc.stop_waiters),
                report,
            )
        };

        if report {
            warn!(transport = self.id(), peer = %self.peer(), "transport start failed: {}", err);
            self.shared.listener.on_failure(self, &err);
        }
        for waiter in start_waiters {
            let _ = waiter.send(Err(err.clone()));
        }
        self.shared.listener.on_disconnected(self);
        for waiter in stop_waiters {
            let _ = waiter.send(());
        }
    }

    fn spawn_io<F>(&self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let transport = self.clone();
        tokio::spawn(async move {
            if let Err(e) = task.await {
                transport.begin_cancel(Some(e));
            }
            transport.io_task_exited();
        });
    }

    /// Moves a connected socket to `Canceling`, reporting `reason` once.
    fn begin_cancel(&self, reason: Option<WirecallError>) {
        let (report, finish_now) = {
            let mut lc = self.shared.lifecycle.lock();
            if lc.socket != SocketState::Connected {
                return;
            }
            let report = match reason {
                Some(err) if !lc.failure_reported => {
                    lc.failure_reported = true;
                    Some(err)
                }
                _ => None,
            };
            lc.socket = SocketState::Canceling {
                pending: lc.io_tasks,
            };
            lc.cancel.cancel();
            (report, lc.io_tasks == 0)
        };

        if let Some(err) = report {
            match err {
                WirecallError::ConnectionClosed => {
                    debug!(transport = self.id(), peer = %self.peer(), "peer closed connection")
                }
                _ => error!(transport = self.id(), peer = %self.peer(), "transport failed: {}", err),
            }
            self.shared.listener.on_failure(self, &err);
        }
        if finish_now {
            self.finish_cancel();
        }
    }

    fn io_task_exited(&self) {
        let (finish, orphaned) = {
            let mut lc = self.shared.lifecycle.lock();
            lc.io_tasks = lc.io_tasks.saturating_sub(1);
            match lc.socket {
                SocketState::Canceling { .. } => {
                    lc.socket = SocketState::Canceling {
                        pending: lc.io_tasks,
                    };
                    (lc.io_tasks == 0, false)
                }
                SocketState::Connected => (false, true),
                _ => (false, false),
            }
        };
        if orphaned {
            self.begin_cancel(Some(WirecallError::Connection(
                "I/O task exited unexpectedly".to_string(),
            )));
        } else if finish {
            self.finish_cancel();
        }
    }

    fn finish_cancel(&self) {
        let stop_waiters = {
            let mut lc = self.shared.lifecycle.lock();
            if lc.socket == SocketState::Canceled {
                return;
            }
            lc.socket = SocketState::Canceled;
            lc.service = ServiceState::Stopped;
            // Drops the last handle to the socket, closing it
            lc.stream = None;
            std::mem::take(&mut lc.stop_waiters)
        };
        self.shared.encoder.lock().clear();

        debug!(transport = self.id(), peer = %self.peer(), "transport disconnected");
        self.shared.listener.on_disconnected(self);
        for waiter in stop_waiters {
            let _ = waiter.send(());
        }
    }

    async fn read_loop(
        self,
        stream: Arc<TcpStream>,
        mut decoder: FrameDecoder,
        cancel: CancellationToken,
    ) -> Result<()> {
        let budget = self.shared.config.read_budget.max(1);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                ready = stream.readable() => ready?,
            }

            let mut consumed = 0;
            loop {
                let frame = {
                    let mut source = ThrottledStream {
                        stream: &stream,
                        throttle: &self.shared.throttle,
                    };
                    decoder.read(&mut source)?
                };
                let Some(frame) = frame else { break };

                consumed += frame.len();
                debug!(transport = self.id(), len = frame.len(), "frame received");
                self.shared.listener.on_frame(&self, frame);

                if consumed >= budget {
                    tokio::task::yield_now().await;
                    consumed = 0;
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                }
            }

            if self.shared.throttle.lock().read_suspended() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    _ = self.shared.read_resumed.notified() => {}
                }
            }
        }
    }

    async fn write_loop(self, stream: Arc<TcpStream>, cancel: CancellationToken) -> Result<()> {
        loop {
            // Wait until offer() queues output into an empty encoder
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = self.shared.write_armed.notified() => {}
            }

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    ready = stream.writable() => ready?,
                }

                let state = {
                    let mut sink = ThrottledStream {
                        stream: &stream,
                        throttle: &self.shared.throttle,
                    };
                    self.shared.encoder.lock().flush(&mut sink)?
                };

                match state {
                    FlushState::WasEmpty => break,
                    FlushState::Empty => {
                        self.shared.listener.on_refill(&self);
                        break;
                    }
                    FlushState::NotEmpty | FlushState::Full => {
                        if self.shared.throttle.lock().write_suspended() {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => return Ok(()),
                                _ = self.shared.write_resumed.notified() => {}
                            }
                        }
                    }
                }
            }
        }
    }

    async fn throttle_loop(self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let resumed = self.shared.throttle.lock().reset();
            if resumed.read {
                self.shared.read_resumed.notify_one();
            }
            if resumed.write {
                self.shared.write_resumed.notify_one();
            }
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lc = self.shared.lifecycle.lock();
        f.debug_struct("Transport")
            .field("id", &self.shared.id)
            .field("peer", &self.shared.peer)
            .field("service", &lc.service)
            .field("socket", &lc.socket)
            .finish()
    }
}

/// Socket view that charges every read and write against the throttle.
struct ThrottledStream<'a> {
    stream: &'a TcpStream,
    throttle: &'a Mutex<Throttle>,
}

impl ByteSource for ThrottledStream<'_> {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let granted = self.throttle.lock().grant_read(buf.len());
        if granted == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = self.stream.try_read(&mut buf[..granted])?;
        self.throttle.lock().record_read(n);
        Ok(n)
    }
}

impl ByteSink for ThrottledStream<'_> {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let granted = self.throttle.lock().grant_write(buf.len());
        if granted == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = self.stream.try_write(&buf[..granted])?;
        self.throttle.lock().record_write(n);
        Ok(n)
    }
}
