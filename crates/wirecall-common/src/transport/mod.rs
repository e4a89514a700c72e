//! Wirecall Transport Layer
//!
//! This module moves frames over non-blocking TCP connections.
//!
//! # Architecture
//!
//! - **Codec**: length-prefixed framing with an outbound queue and a
//!   resumable inbound parser
//! - **Transport**: one connection, driven by a reader task and a writer
//!   task over tokio readiness, with explicit service and socket states
//! - **Transport Server**: accept loop producing transports
//!
//! # Components
//!
//! - **[`FrameCodec`]**: framing, backpressure (`Full`) and flush states
//! - **[`Transport`]** / **[`TransportListener`]**: a framed connection and its events
//! - **[`TransportServer`]** / **[`AcceptHandler`]**: inbound connections
//! - **[`Endpoint`]**: `tcp://host:port` addresses
//!
//! # Message Size Limits
//!
//! Inbound frames above [`MAX_FRAME_SIZE`] (100 MB by default) are a framing
//! error and close the connection.

pub mod address;
pub mod codec;
pub mod tcp;
pub mod tcp_server;

pub use address::Endpoint;
pub use codec::{
    ByteSink, ByteSource, FlushState, FrameCodec, FrameDecoder, FrameEncoder, WriteState,
    DEFAULT_HIGH_WATER_MARK, MAX_FRAME_SIZE,
};
pub use tcp::{
    ServiceState, SocketState, Transport, TransportConfig, TransportId, TransportListener,
    DEFAULT_READ_BUDGET,
};
pub use tcp_server::{AcceptHandler, TransportServer};

#[cfg(test)]
mod tests;
