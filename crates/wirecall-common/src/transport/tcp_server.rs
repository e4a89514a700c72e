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

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::error::{Result, WirecallError};
use crate::transport::tcp::{Transport, TransportConfig, TransportListener};

/// Pause after a failed accept, so that persistent errors such as file
/// descriptor exhaustion do not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Receives the connections accepted by a [`TransportServer`].
pub trait AcceptHandler: Send + Sync + 'static {
    /// Returns the listener for a connection from `peer`.
    fn connection_listener(&self, peer: SocketAddr) -> Arc<dyn TransportListener>;

    /// Takes ownership of a newly accepted, not yet started transport.
    fn on_accept(&self, transport: Transport);

    /// Called for each failed accept; the accept loop keeps running.
    fn on_accept_error(&self, error: &WirecallError) {
        warn!("accept failed: {}", error);
    }
}

/// Async TCP server that turns accepted sockets into transports.
///
/// # Example
///
/// ```no_run
/// use std::net::SocketAddr;
/// use std::sync::Arc;
/// use bytes::Bytes;
/// use wirecall_common::transport::{
///     AcceptHandler, Transport, TransportConfig, TransportListener, TransportServer,
/// };
///
/// struct Sink;
/// impl TransportListener for Sink {
///     fn on_frame(&self, _transport: &Transport, _frame: Bytes) {}
/// }
///
/// struct Accept;
/// impl AcceptHandler for Accept {
///     fn connection_listener(&self, _peer: SocketAddr) -> Arc<dyn TransportListener> {
///         Arc::new(Sink)
///     }
///     fn on_accept(&self, transport: Transport) {
///         tokio::spawn(async move { transport.start().await });
///     }
/// }
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let server = TransportServer::bind("127.0.0.1:0", TransportConfig::default(), Arc::new(Accept))
///     .await
///     .unwrap();
/// println!("listening on {}", server.local_addr());
/// server.stop().await;
/// # });
/// ```
pub struct TransportServer {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TransportServer {
    /// Binds to `bind_addr` and starts accepting connections.
    ///
    /// # Arguments
    ///
    /// * `bind_addr` - The address to bind to (e.g., "0.0.0.0:7000"); port 0
    ///   picks a free port
    /// * `config` - Configuration for every accepted transport
    /// * `handler` - Receives the accepted transports
    pub async fn bind(
        bind_addr: &str,
        config: TransportConfig,
        handler: Arc<dyn AcceptHandler>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            WirecallError::Connection(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "transport server listening");

        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(listener, config, handler, cancel.clone()));

        Ok(Self {
            local_addr,
            cancel,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and closes the listening socket.
    ///
    /// Transports already handed to the accept handler are not affected.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("accept loop ended abnormally: {}", e);
            }
            info!(addr = %self.local_addr, "transport server stopped");
        }
    }
}

impl Drop for TransportServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: TransportConfig,
    handler: Arc<dyn AcceptHandler>,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "connection accepted");
                let listener = handler.connection_listener(peer);
                handler.on_accept(Transport::from_stream(stream, config.clone(), listener));
            }
            Err(e) => {
                handler.on_accept_error(&WirecallError::from(e));
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
    // listener dropped here, closing the socket
}
