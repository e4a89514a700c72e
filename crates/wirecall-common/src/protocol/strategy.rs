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

use std::fmt;

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{Result, WirecallError};

/// An application-level failure raised by a remote method.
///
/// Faults travel inside the result payload of a response frame, so the
/// caller can tell "the method failed" apart from "no answer arrived".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Short machine-readable category, e.g. `"invalid_argument"`
    pub kind: String,
    /// Human readable description
    pub message: String,
}

impl Fault {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Wraps any error as a fault of kind `"error"`.
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        Self::new("error", err.to_string())
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Fault {}

/// Pluggable encoding of method arguments and results.
///
/// The strategy is chosen per method by name; both peers must agree on it.
/// Argument lists are encoded as tuples and results as
/// `Result<T, Fault>`.
///
/// # Example
///
/// ```
/// use bytes::BytesMut;
/// use wirecall_common::protocol::strategy::SerializationStrategy;
///
/// let strategy = SerializationStrategy::by_name("postcard").unwrap();
/// let mut sink = BytesMut::new();
/// strategy.encode_args(&(1i64, 2i64), &mut sink).unwrap();
/// let args: (i64, i64) = strategy.decode_args(&sink).unwrap();
/// assert_eq!(args, (1, 2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SerializationStrategy {
    /// Self-describing JSON via serde_json
    #[default]
    Json,
    /// Compact binary via postcard
    Postcard,
}

impl SerializationStrategy {
    /// Name of the strategy used when a method does not pick one.
    pub const DEFAULT_NAME: &'static str = "json";

    /// Resolves a strategy by name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStrategy` for names other than `json` and `postcard`.
    pub fn by_name(name: &str) -> Result<Self> {
        match name {
            "json" => Ok(SerializationStrategy::Json),
            "postcard" => Ok(SerializationStrategy::Postcard),
            other => Err(WirecallError::UnknownStrategy(other.to_string())),
        }
    }

    /// Resolves an optional strategy name, falling back to the default.
    pub fn resolve(name: Option<&str>) -> Result<Self> {
        name.map_or(Ok(Self::default()), Self::by_name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SerializationStrategy::Json => "json",
            SerializationStrategy::Postcard => "postcard",
        }
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T, sink: &mut BytesMut) -> Result<()> {
        match self {
            SerializationStrategy::Json => {
                serde_json::to_writer((&mut *sink).writer(), value)?;
            }
            SerializationStrategy::Postcard => {
                let encoded = postcard::to_allocvec(value)?;
                sink.put_slice(&encoded);
            }
        }
        Ok(())
    }

    fn decode<T: DeserializeOwned>(&self, source: &[u8]) -> Result<T> {
        match self {
            SerializationStrategy::Json => Ok(serde_json::from_slice(source)?),
            SerializationStrategy::Postcard => Ok(postcard::from_bytes(source)?),
        }
    }

    /// Appends the encoded argument tuple to `sink`.
    pub fn encode_args<A: Serialize + ?Sized>(&self, args: &A, sink: &mut BytesMut) -> Result<()> {
        self.encode(args, sink)
    }

    /// Decodes an argument tuple.
    pub fn decode_args<A: DeserializeOwned>(&self, source: &[u8]) -> Result<A> {
        self.decode(source)
    }

    /// Appends an encoded method outcome (value or fault) to `sink`.
    pub fn encode_result<R: Serialize>(
        &self,
        outcome: &std::result::Result<R, Fault>,
        sink: &mut BytesMut,
    ) -> Result<()> {
        self.encode(outcome, sink)
    }

    /// Decodes a method outcome.
    ///
    /// The outer `Result` reports payload corruption; the inner one is the
    /// remote method's own outcome.
    pub fn decode_result<R: DeserializeOwned>(
        &self,
        source: &[u8],
    ) -> Result<std::result::Result<R, Fault>> {
        self.decode(source)
    }
}

impl fmt::Display for SerializationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
