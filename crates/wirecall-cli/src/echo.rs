//! Built-in `echo` service hosted by `wirecall serve`.

use std::sync::Arc;
use std::time::Duration;

use wirecall_common::Fault;
use wirecall_server::{ServerInvoker, ServiceDefinition, SingletonFactory};

/// Identifier the echo service is registered under.
pub const SERVICE_ID: &str = "echo";

/// Methods of the echo service, as accepted by `wirecall call`.
pub const METHODS: [&str; 4] = ["echo", "reverse", "add", "sleep_ms"];

/// A stateless service for trying out a server from the command line.
pub struct EchoService;

impl EchoService {
    pub fn definition() -> ServiceDefinition<Self> {
        ServiceDefinition::new()
            .method("echo", |_: &Self, (text,): (String,)| Ok::<_, Fault>(text))
            .method("reverse", |_: &Self, (text,): (String,)| {
                Ok::<_, Fault>(text.chars().rev().collect::<String>())
            })
            .method("add", |_: &Self, (a, b): (i64, i64)| {
                a.checked_add(b)
                    .ok_or_else(|| Fault::new("Overflow", format!("{} + {} overflows i64", a, b)))
            })
            .method("sleep_ms", |_: &Self, (ms,): (u64,)| {
                std::thread::sleep(Duration::from_millis(ms));
                Ok::<_, Fault>(ms)
            })
    }
}

/// Registers the echo service on `invoker`.
pub fn register(invoker: &ServerInvoker) {
    invoker.register_service(
        SERVICE_ID,
        SingletonFactory::from_arc(Arc::new(EchoService)),
        EchoService::definition(),
    );
}
