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

use std::sync::Arc;

use thiserror::Error;

use super::strategy::Fault;

/// Errors produced anywhere in the RPC layer.
///
/// The enum is `Clone` so that a single transport failure can be fanned out
/// to every request that was in flight on that transport. I/O errors are
/// held behind an `Arc` for that reason.
#[derive(Error, Debug, Clone)]
pub enum WirecallError {
    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Transport pool stopped")]
    Stopped,

    #[error("Client stopped")]
    ClientStopped,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Method not found: {service}.{signature}")]
    MethodNotFound { service: String, signature: String },

    #[error("Invalid method signature: {0}")]
    InvalidSignature(String),

    #[error("Unknown serialization strategy: {0}")]
    UnknownStrategy(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Remote fault: {0}")]
    Remote(Fault),

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

/// Coarse classification of a [`WirecallError`].
///
/// Callers use this to tell "no answer" (`Timeout`) apart from "the answer
/// was an error" (`Application`) and from infrastructure failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Corrupt or oversized frame; fatal to one connection.
    Framing,
    /// Socket I/O failure or disconnect.
    Connection,
    /// Unknown service or method on the receiving side.
    Resolution,
    /// The invoked method reported a fault.
    Application,
    /// No response within the configured window.
    Timeout,
    /// The pool or client was shut down.
    Stopped,
    /// Encoding or decoding of arguments and results.
    Serialization,
    /// Misuse of the API: bad address, invalid lifecycle transition.
    Usage,
    /// A worker task panicked or was cancelled.
    Internal,
}

impl WirecallError {
    /// Returns the error's classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WirecallError::Framing(_) | WirecallError::FrameTooLarge { .. } => ErrorKind::Framing,
            WirecallError::Connection(_)
            | WirecallError::ConnectionClosed
            | WirecallError::Io(_) => ErrorKind::Connection,
            WirecallError::ServiceNotFound(_) | WirecallError::MethodNotFound { .. } => {
                ErrorKind::Resolution
            }
            WirecallError::Remote(_) => ErrorKind::Application,
            WirecallError::Timeout(_) => ErrorKind::Timeout,
            WirecallError::Stopped | WirecallError::ClientStopped => ErrorKind::Stopped,
            WirecallError::Serialization(_) => ErrorKind::Serialization,
            WirecallError::InvalidState(_)
            | WirecallError::InvalidAddress(_)
            | WirecallError::InvalidSignature(_)
            | WirecallError::UnknownStrategy(_) => ErrorKind::Usage,
            WirecallError::TaskFailed(_) => ErrorKind::Internal,
        }
    }

    /// Returns `true` if the error ends the connection it occurred on.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self.kind(), ErrorKind::Framing | ErrorKind::Connection)
    }
}

impl From<std::io::Error> for WirecallError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected => WirecallError::Connection(err.to_string()),
            std::io::ErrorKind::UnexpectedEof => WirecallError::ConnectionClosed,
            _ => WirecallError::Io(Arc::new(err)),
        }
    }
}

impl From<serde_json::Error> for WirecallError {
    fn from(err: serde_json::Error) -> Self {
        WirecallError::Serialization(err.to_string())
    }
}

impl From<postcard::Error> for WirecallError {
    fn from(err: postcard::Error) -> Self {
        WirecallError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for WirecallError {
    fn from(err: url::ParseError) -> Self {
        WirecallError::InvalidAddress(err.to_string())
    }
}

impl From<std::net::AddrParseError> for WirecallError {
    fn from(err: std::net::AddrParseError) -> Self {
        WirecallError::InvalidAddress(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WirecallError>;
