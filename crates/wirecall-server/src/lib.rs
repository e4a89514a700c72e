//! Wirecall Server
//!
//! This crate hosts services for remote callers: a registry of typed method
//! tables, pluggable instance factories, a bounded worker pool for blocking
//! methods, and the [`ServerInvoker`] that ties them to a listening
//! transport server.

pub mod definition;
pub mod invoker;
pub mod service;
pub mod worker;

pub use definition::ServiceDefinition;
pub use invoker::{ServerConfig, ServerInvoker};
pub use service::{PooledFactory, ServiceFactory, SingletonFactory};
pub use worker::WorkerPool;
