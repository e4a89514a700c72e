// Integration tests for wirecall-server
//
// These tests host services on a real loopback listener and call them with
// the Wirecall client.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use wirecall_client::{ClientConfig, ClientInvoker, PoolConfig};
use wirecall_common::dispatch::DispatchQueue;
use wirecall_common::{ErrorKind, Fault, SerializationStrategy, WirecallError};
use wirecall_server::{
    PooledFactory, ServerConfig, ServerInvoker, ServiceDefinition, SingletonFactory,
};

// ============================================================================
// Test Helpers
// ============================================================================

struct Echo;

fn echo_definition() -> ServiceDefinition<Echo> {
    ServiceDefinition::new()
        .method("echo", |_: &Echo, (text,): (String,)| Ok::<_, Fault>(text))
        .method("add", |_: &Echo, (a, b): (i64, i64)| Ok::<_, Fault>(a + b))
        .method("div", |_: &Echo, (a, b): (i64, i64)| {
            if b == 0 {
                return Err(Fault::new("InvalidInput", "divide by zero"));
            }
            Ok(a / b)
        })
        .method_with_strategy(
            "concat",
            SerializationStrategy::Postcard,
            |_: &Echo, (parts,): (Vec<String>,)| Ok::<_, Fault>(parts.concat()),
        )
        .async_method("shout", |_: Arc<Echo>, (text,): (String,)| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, Fault>(text.to_uppercase())
        })
}

async fn start_server() -> (ServerInvoker, String) {
    let server = ServerInvoker::new(ServerConfig::default());
    server.register_service("echo", SingletonFactory::new(Echo), echo_definition());
    let addr = server.listen("127.0.0.1:0").await.unwrap();
    (server, format!("tcp://{}", addr))
}

fn short_timeout_client() -> ClientInvoker {
    ClientInvoker::new(ClientConfig::default().with_request_timeout(Duration::from_millis(200)))
}

// ============================================================================
// Round Trips
// ============================================================================

#[tokio::test]
async fn test_blocking_method_round_trip() {
    let (server, address) = start_server().await;
    let client = ClientInvoker::new(ClientConfig::default());
    let proxy = client.proxy(&address, "echo").unwrap();

    let echo = proxy.method::<(String,), String>("echo").unwrap();
    assert_eq!(echo.call(("hi".to_string(),)).await.unwrap(), "hi");

    let add = proxy.method::<(i64, i64), i64>("add").unwrap();
    assert_eq!(add.call((2, 3)).await.unwrap(), 5);

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_async_method_round_trip() {
    let (server, address) = start_server().await;
    let client = ClientInvoker::new(ClientConfig::default());

    let shouted: String = client
        .invoke(&address, "echo", "shout", ("quiet".to_string(),))
        .await
        .unwrap();
    assert_eq!(shouted, "QUIET");

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_postcard_method_round_trip() {
    let (server, address) = start_server().await;
    let client = ClientInvoker::new(ClientConfig::default());
    let concat = client
        .proxy(&address, "echo")
        .unwrap()
        .method_with_strategy::<(Vec<String>,), String>("concat", "postcard")
        .unwrap();

    let joined = concat
        .call((vec!["wire".to_string(), "call".to_string()],))
        .await
        .unwrap();
    assert_eq!(joined, "wirecall");

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_fault_reaches_caller() {
    let (server, address) = start_server().await;
    let client = ClientInvoker::new(ClientConfig::default());

    let err = client
        .invoke::<(i64, i64), i64>(&address, "echo", "div", (1, 0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Application);
    assert!(err.to_string().contains("divide by zero"));

    // The connection survives an application error
    let ok: i64 = client.invoke(&address, "echo", "div", (9i64, 3i64)).await.unwrap();
    assert_eq!(ok, 3);

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_large_responses_exceed_high_water_mark() {
    let (server, address) = start_server().await;
    let client = ClientInvoker::new(ClientConfig::default());
    let echo = client
        .proxy(&address, "echo")
        .unwrap()
        .method::<(String,), String>("echo")
        .unwrap();

    let payload = "x".repeat(512 * 1024);
    let calls = (0..8).map(|_| echo.call((payload.clone(),)));
    for result in join_all(calls).await {
        assert_eq!(result.unwrap().len(), payload.len());
    }

    client.stop().await;
    server.stop().await;
}

// ============================================================================
// Unresolvable Requests
// ============================================================================

#[tokio::test]
async fn test_unknown_service_times_out() {
    let (server, address) = start_server().await;
    let client = short_timeout_client();

    let err = client
        .invoke::<(String,), String>(&address, "missing", "echo", ("x".to_string(),))
        .await
        .unwrap_err();
    assert!(matches!(err, WirecallError::Timeout(_)));

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_unknown_signature_times_out() {
    let (server, address) = start_server().await;
    let client = short_timeout_client();

    // echo takes a string, not an integer
    let err = client
        .invoke::<(i64,), String>(&address, "echo", "echo", (1,))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    // The connection is still usable
    let reply: String = client
        .invoke(&address, "echo", "echo", ("still here".to_string(),))
        .await
        .unwrap();
    assert_eq!(reply, "still here");

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_unregistered_service_stops_answering() {
    let (server, address) = start_server().await;
    let client = short_timeout_client();

    let sum: i64 = client.invoke(&address, "echo", "add", (1i64, 1i64)).await.unwrap();
    assert_eq!(sum, 2);

    assert!(server.unregister_service("echo"));
    let err = client
        .invoke::<(i64, i64), i64>(&address, "echo", "add", (1, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, WirecallError::Timeout(_)));

    client.stop().await;
    server.stop().await;
}

// ============================================================================
// Execution Placement
// ============================================================================

struct Exclusive {
    busy: AtomicBool,
    calls: AtomicUsize,
}

#[tokio::test]
async fn test_dispatch_queue_serializes_calls() {
    let server = ServerInvoker::new(ServerConfig::default());
    let service = Exclusive {
        busy: AtomicBool::new(false),
        calls: AtomicUsize::new(0),
    };
    server.register_service(
        "exclusive",
        SingletonFactory::new(service).with_dispatch_queue(DispatchQueue::new("exclusive")),
        ServiceDefinition::new().method("enter", |s: &Exclusive, (): ()| {
            if s.busy.swap(true, Ordering::SeqCst) {
                return Err(Fault::new("Overlap", "concurrent call"));
            }
            std::thread::sleep(Duration::from_millis(5));
            s.busy.store(false, Ordering::SeqCst);
            Ok(s.calls.fetch_add(1, Ordering::SeqCst) + 1)
        }),
    );
    let addr = server.listen("127.0.0.1:0").await.unwrap();

    let client = ClientInvoker::new(
        ClientConfig::default().with_pool(PoolConfig::default().with_pool_size(2)),
    );
    let enter = client
        .proxy(&format!("tcp://{}", addr), "exclusive")
        .unwrap()
        .method::<(), usize>("enter")
        .unwrap();

    let mut counts: Vec<usize> = join_all((0..10).map(|_| enter.call(())))
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    counts.sort_unstable();
    assert_eq!(counts, (1..=10).collect::<Vec<_>>());

    client.stop().await;
    server.stop().await;
}

struct Worker {
    in_use: AtomicBool,
}

#[tokio::test]
async fn test_pooled_factory_hands_out_exclusive_instances() {
    let server = ServerInvoker::new(ServerConfig::default().with_worker_threads(4));
    server.register_service(
        "worker",
        PooledFactory::new(4, || Worker {
            in_use: AtomicBool::new(false),
        }),
        ServiceDefinition::new().method("work", |w: &Worker, (ms,): (u64,)| {
            if w.in_use.swap(true, Ordering::SeqCst) {
                return Err(Fault::new("Shared", "instance used concurrently"));
            }
            std::thread::sleep(Duration::from_millis(ms));
            w.in_use.store(false, Ordering::SeqCst);
            Ok(())
        }),
    );
    let addr = server.listen("127.0.0.1:0").await.unwrap();

    let client = ClientInvoker::new(ClientConfig::default());
    let work = client
        .proxy(&format!("tcp://{}", addr), "worker")
        .unwrap()
        .method::<(u64,), ()>("work")
        .unwrap();

    for result in join_all((0..12).map(|_| work.call((10,)))).await {
        result.unwrap();
    }

    client.stop().await;
    server.stop().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_stop_closes_connections() {
    let (server, address) = start_server().await;
    let client = ClientInvoker::new(ClientConfig::default());

    let _: String = client
        .invoke(&address, "echo", "echo", ("x".to_string(),))
        .await
        .unwrap();
    assert_eq!(server.connection_count(), 1);

    server.stop().await;
    assert_eq!(server.connection_count(), 0);

    let err = client
        .invoke::<(String,), String>(&address, "echo", "echo", ("y".to_string(),))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);

    client.stop().await;
}
