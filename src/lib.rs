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

//! # Wirecall
//!
//! Pooled, correlated request/response RPC over persistent TCP connections.
//!
//! This crate re-exports the workspace crates:
//!
//! - [`common`]: wire protocol, framing codec and transports
//! - [`client`]: client invoker, service proxies and transport pools
//! - [`server`]: server invoker, service definitions and factories
//!
//! ## Example
//!
//! ```no_run
//! use wirecall::{ClientConfig, ClientInvoker, Fault, ServerConfig, ServerInvoker};
//! use wirecall::{ServiceDefinition, SingletonFactory};
//!
//! struct Calculator;
//!
//! # #[tokio::main]
//! # async fn main() -> wirecall::Result<()> {
//! let server = ServerInvoker::new(ServerConfig::default());
//! server.register_service(
//!     "calculator",
//!     SingletonFactory::new(Calculator),
//!     ServiceDefinition::new()
//!         .method("add", |_: &Calculator, (a, b): (i64, i64)| Ok::<_, Fault>(a + b)),
//! );
//! let addr = server.listen("127.0.0.1:0").await?;
//!
//! let client = ClientInvoker::new(ClientConfig::default());
//! let add = client
//!     .proxy(&format!("tcp://{}", addr), "calculator")?
//!     .method::<(i64, i64), i64>("add")?;
//! assert_eq!(add.call((2, 3)).await?, 5);
//!
//! client.stop().await;
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

pub use wirecall_client as client;
pub use wirecall_common as common;
pub use wirecall_server as server;

pub use wirecall_client::{
    AsyncMethodHandle, ClientConfig, ClientInvoker, MethodHandle, PoolConfig, ServiceProxy,
};
pub use wirecall_common::dispatch::DispatchQueue;
pub use wirecall_common::rate_limit::RateLimitConfig;
pub use wirecall_common::transport::TransportConfig;
pub use wirecall_common::{
    ErrorKind, Fault, MethodSignature, Result, SerializationStrategy, WireArgs, WireType,
    WirecallError,
};
pub use wirecall_server::{
    PooledFactory, ServerConfig, ServerInvoker, ServiceDefinition, ServiceFactory,
    SingletonFactory,
};
