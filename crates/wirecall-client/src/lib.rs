//! Wirecall Client
//!
//! Typed service proxies over pooled, correlated TCP transports.

pub mod client;
pub mod pool;
pub mod proxy;

pub use client::{ClientConfig, ClientInvoker, InvocationMode, MethodData};
pub use pool::{PoolConfig, PoolOwner, PoolStats, TransportPool};
pub use proxy::{AsyncMethodHandle, MethodHandle, ServiceProxy};
