//! Integration tests for the transport layer
//!
//! These tests run transports over real loopback sockets and check the
//! lifecycle, framing and flow-control behavior seen by listeners.

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use crate::protocol::wire::{self, FrameBuilder};
    use crate::protocol::WirecallError;
    use crate::rate_limit::RateLimitConfig;
    use crate::transport::*;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<Bytes>>,
        connected: AtomicUsize,
        refills: AtomicUsize,
        failures: Mutex<Vec<WirecallError>>,
        disconnected: AtomicUsize,
    }

    impl TransportListener for Recorder {
        fn on_connected(&self, _transport: &Transport) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }

        fn on_frame(&self, _transport: &Transport, frame: Bytes) {
            self.frames.lock().push(frame);
        }

        fn on_refill(&self, _transport: &Transport) {
            self.refills.fetch_add(1, Ordering::SeqCst);
        }

        fn on_failure(&self, _transport: &Transport, error: &WirecallError) {
            self.failures.lock().push(error.clone());
        }

        fn on_disconnected(&self, _transport: &Transport) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not met within 5s");
    }

    fn frame(id: u64, payload: &[u8]) -> Bytes {
        let mut builder = FrameBuilder::response(id);
        builder.payload_mut().extend_from_slice(payload);
        builder.finish().unwrap()
    }

    fn endpoint(addr: SocketAddr) -> Endpoint {
        Endpoint::from_socket_addr(addr)
    }

    async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix).await.unwrap();
        let len = i32::from_be_bytes(prefix) as usize;
        let mut frame = prefix.to_vec();
        frame.resize(len, 0);
        stream.read_exact(&mut frame[4..]).await.unwrap();
        frame
    }

    /// Connects a transport to a raw listener and returns both ends.
    async fn connected_pair(
        config: TransportConfig,
    ) -> (Transport, Arc<Recorder>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let recorder = Arc::new(Recorder::default());
        let transport = Transport::connect(endpoint(addr), config, recorder.clone())
            .await
            .unwrap();
        let peer = accept.await.unwrap();
        (transport, recorder, peer)
    }

    #[tokio::test]
    async fn test_connect_send_and_receive() {
        let (transport, recorder, mut peer) = connected_pair(TransportConfig::default()).await;
        assert_eq!(transport.service_state(), ServiceState::Started);
        assert_eq!(transport.socket_state(), SocketState::Connected);
        wait_for(|| recorder.refills.load(Ordering::SeqCst) >= 1).await;
        assert_eq!(recorder.connected.load(Ordering::SeqCst), 1);

        let outbound = frame(1, b"ping");
        assert!(transport.offer(outbound.clone()));
        assert_eq!(read_frame(&mut peer).await, outbound.to_vec());

        let inbound = frame(2, b"pong");
        peer.write_all(&inbound).await.unwrap();
        wait_for(|| recorder.frames.lock().len() == 1).await;
        assert_eq!(recorder.frames.lock()[0], inbound);
        assert_eq!(wire::peek_correlation_id(&recorder.frames.lock()[0]).unwrap(), 2);

        transport.stop().await;
    }

    #[tokio::test]
    async fn test_refill_after_drain() {
        let (transport, recorder, mut peer) = connected_pair(TransportConfig::default()).await;
        wait_for(|| recorder.refills.load(Ordering::SeqCst) == 1).await;

        assert!(transport.offer(frame(1, &[9; 100])));
        read_frame(&mut peer).await;
        wait_for(|| recorder.refills.load(Ordering::SeqCst) == 2).await;
        assert_eq!(transport.pending_output(), 0);

        transport.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_starts_coalesce() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let recorder = Arc::new(Recorder::default());
        let transport = Transport::new(endpoint(addr), TransportConfig::default(), recorder.clone());
        assert_eq!(transport.service_state(), ServiceState::Created);

        let (a, b) = tokio::join!(transport.start(), transport.start());
        a.unwrap();
        b.unwrap();
        assert_eq!(recorder.connected.load(Ordering::SeqCst), 1);

        // Already started
        transport.start().await.unwrap();
        assert_eq!(recorder.connected.load(Ordering::SeqCst), 1);
        transport.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_socket() {
        let (transport, recorder, mut peer) = connected_pair(TransportConfig::default()).await;

        let (_, _) = tokio::join!(transport.stop(), transport.stop());
        assert_eq!(transport.service_state(), ServiceState::Stopped);
        assert_eq!(transport.socket_state(), SocketState::Canceled);
        assert_eq!(recorder.disconnected.load(Ordering::SeqCst), 1);
        assert!(recorder.failures.lock().is_empty());
        assert!(!transport.offer(frame(1, b"late")));

        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(5), peer.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0, "peer should observe EOF");

        // Stopping again is a no-op
        transport.stop().await;
        assert_eq!(recorder.disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_peer_close_reports_failure_once() {
        let (transport, recorder, peer) = connected_pair(TransportConfig::default()).await;
        drop(peer);

        wait_for(|| recorder.disconnected.load(Ordering::SeqCst) == 1).await;
        let failures = recorder.failures.lock().clone();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], WirecallError::ConnectionClosed));
        assert_eq!(transport.service_state(), ServiceState::Stopped);
        assert!(!transport.offer(frame(1, b"x")));
    }

    #[tokio::test]
    async fn test_framing_error_closes_connection() {
        let (transport, recorder, mut peer) = connected_pair(TransportConfig::default()).await;
        peer.write_all(&2i32.to_be_bytes()).await.unwrap();

        wait_for(|| recorder.disconnected.load(Ordering::SeqCst) == 1).await;
        assert!(matches!(
            recorder.failures.lock()[0],
            WirecallError::Framing(_)
        ));
        assert_eq!(transport.socket_state(), SocketState::Canceled);
    }

    #[tokio::test]
    async fn test_oversized_inbound_frame() {
        let config = TransportConfig::default().with_max_frame_size(64);
        let (_transport, recorder, mut peer) = connected_pair(config).await;
        peer.write_all(&frame(1, &[0; 100])).await.unwrap();

        wait_for(|| recorder.disconnected.load(Ordering::SeqCst) == 1).await;
        assert!(matches!(
            recorder.failures.lock()[0],
            WirecallError::FrameTooLarge { max: 64, .. }
        ));
        assert!(recorder.frames.lock().is_empty());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let recorder = Arc::new(Recorder::default());
        let err = Transport::connect(endpoint(addr), TransportConfig::default(), recorder.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, WirecallError::Connection(_)));
        assert_eq!(recorder.failures.lock().len(), 1);
        assert_eq!(recorder.disconnected.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.connected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepts = tokio::spawn(async move {
            let first = listener.accept().await.unwrap().0;
            let second = listener.accept().await.unwrap().0;
            (first, second)
        });

        let recorder = Arc::new(Recorder::default());
        let transport = Transport::connect(endpoint(addr), TransportConfig::default(), recorder.clone())
            .await
            .unwrap();
        transport.stop().await;
        transport.start().await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(recorder.connected.load(Ordering::SeqCst), 2);

        let (_first, mut second) = accepts.await.unwrap();
        let f = frame(3, b"again");
        assert!(transport.offer(f.clone()));
        assert_eq!(read_frame(&mut second).await, f.to_vec());
        transport.stop().await;
    }

    #[tokio::test]
    async fn test_accepted_stream_stopped_before_start_stays_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();

        let recorder = Arc::new(Recorder::default());
        let transport =
            Transport::from_stream(accepted, TransportConfig::default(), recorder.clone());
        transport.stop().await;
        assert_eq!(transport.service_state(), ServiceState::Stopped);
        assert_eq!(transport.socket_state(), SocketState::Canceled);

        let err = transport.start().await.unwrap_err();
        assert!(matches!(err, WirecallError::InvalidState(_)));
        assert!(!transport.is_connected());
        assert_eq!(recorder.connected.load(Ordering::SeqCst), 0);

        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0, "client should observe EOF");
    }

    #[tokio::test]
    async fn test_offer_refused_at_high_water_mark() {
        // A zero write allowance keeps everything queued
        let config = TransportConfig::default()
            .with_high_water_mark(8)
            .with_rate_limit(
                RateLimitConfig::per_second(None, Some(0)).with_interval(Duration::from_secs(3600)),
            );
        let (transport, _recorder, _peer) = connected_pair(config).await;

        let first = frame(1, &[1; 15]);
        assert!(transport.offer(first));
        assert_eq!(transport.pending_output(), 20);
        assert!(!transport.offer(frame(2, b"")));
        transport.stop().await;
        assert_eq!(transport.pending_output(), 0);
    }

    #[tokio::test]
    async fn test_rate_limited_write_still_delivers() {
        let config = TransportConfig::default().with_rate_limit(
            RateLimitConfig::per_second(None, Some(64)).with_interval(Duration::from_millis(20)),
        );
        let (transport, _recorder, mut peer) = connected_pair(config).await;

        let big = frame(1, &[5; 508]);
        let started = Instant::now();
        assert!(transport.offer(big.clone()));
        let received = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut peer))
            .await
            .unwrap();
        assert_eq!(received, big.to_vec());
        // 513 bytes at 64 bytes per 20ms needs at least 8 resets
        assert!(started.elapsed() >= Duration::from_millis(100));
        transport.stop().await;
    }

    struct Echo;

    impl TransportListener for Echo {
        fn on_frame(&self, transport: &Transport, frame: Bytes) {
            transport.offer(frame);
        }
    }

    #[derive(Default)]
    struct EchoAccept {
        accepted: Mutex<Vec<Transport>>,
    }

    impl AcceptHandler for EchoAccept {
        fn connection_listener(&self, _peer: SocketAddr) -> Arc<dyn TransportListener> {
            Arc::new(Echo)
        }

        fn on_accept(&self, transport: Transport) {
            self.accepted.lock().push(transport.clone());
            tokio::spawn(async move {
                let _ = transport.start().await;
            });
        }
    }

    #[tokio::test]
    async fn test_transport_server_echo() {
        let handler = Arc::new(EchoAccept::default());
        let server = TransportServer::bind("127.0.0.1:0", TransportConfig::default(), handler.clone())
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);

        let recorder = Arc::new(Recorder::default());
        let client = Transport::connect(
            endpoint(server.local_addr()),
            TransportConfig::default(),
            recorder.clone(),
        )
        .await
        .unwrap();

        for id in 0..10u64 {
            assert!(client.offer(frame(id, format!("msg-{}", id).as_bytes())));
        }
        wait_for(|| recorder.frames.lock().len() == 10).await;
        let ids: Vec<u64> = recorder
            .frames
            .lock()
            .iter()
            .map(|f| wire::peek_correlation_id(f).unwrap())
            .collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>(), "frames stay ordered");
        assert_eq!(handler.accepted.lock().len(), 1);

        server.stop().await;
        assert!(TcpStream::connect(server.local_addr()).await.is_err());

        // Existing connections outlive the accept loop
        assert!(client.offer(frame(99, b"still here")));
        wait_for(|| recorder.frames.lock().len() == 11).await;

        client.stop().await;
        let accepted = handler.accepted.lock().clone();
        for transport in accepted {
            transport.stop().await;
        }
    }
}
