//! Wirecall Common Types and Transport
//!
//! This crate provides the wire protocol and the non-blocking TCP transport
//! layer shared by the Wirecall client and server.
//!
//! # Overview
//!
//! Wirecall is a request/response RPC layer over persistent TCP connections.
//! A client calls methods of services hosted by a remote server; requests
//! and responses are matched by a correlation id, so many calls can be in
//! flight on one connection. This crate contains:
//!
//! - **Protocol Layer**: error taxonomy, wire format, method signatures and
//!   serialization strategies
//! - **Transport Layer**: framing codec, `Transport` state machines and the
//!   accepting `TransportServer`
//! - **Support**: byte-rate limiting and the serial `DispatchQueue`
//!
//! # Architecture
//!
//! - **Transport**: TCP, non-blocking, one reader and one writer task per connection
//! - **Serialization**: per-method strategy, `json` (default) or `postcard`
//! - **Message Format**: `[4-byte total length, i32 big-endian] + [varint id] + [header] + [payload]`
//! - **Max Message Size**: 100 MB by default
//!
//! # Components
//!
//! - [`protocol`] - Errors, frames, signatures and strategies
//! - [`transport`] - Codec, transports and server
//! - [`rate_limit`] - Per-transport byte allowances
//! - [`dispatch`] - Serialized execution contexts
//!
//! # Example
//!
//! ```
//! use wirecall_common::{FrameBuilder, MethodSignature, SerializationStrategy};
//!
//! let signature = MethodSignature::of::<(i64, i64)>("add");
//! let mut builder = FrameBuilder::request(1, "calculator", signature.as_str());
//! SerializationStrategy::Json
//!     .encode_args(&(2i64, 3i64), builder.payload_mut())
//!     .unwrap();
//! let frame = builder.finish().unwrap();
//! assert_eq!(&frame[..4], &(frame.len() as i32).to_be_bytes());
//! ```

pub mod dispatch;
pub mod protocol;
pub mod rate_limit;
pub mod transport;

pub use protocol::*;
