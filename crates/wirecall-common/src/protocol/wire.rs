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

//! Wirecall Wire Format
//!
//! Every message on the wire is a frame:
//!
//! ```text
//! request:  [i32 total length][varint correlation id][lp-utf8 service][lp-utf8 signature][payload]
//! response: [i32 total length][varint correlation id][payload]
//! ```
//!
//! The total length is big-endian and counts its own four bytes. Varints are
//! LEB128 (seven bits per byte, least significant group first). `lp-utf8`
//! strings are a varint byte length followed by UTF-8 bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::{Result, WirecallError};

/// Size of the frame length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Longest LEB128 encoding of a `u64`.
const MAX_VARINT_LEN: usize = 10;

/// Correlation identifier linking a request frame to its response frame.
pub type CorrelationId = u64;

/// Appends `value` as a LEB128 varint.
pub fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Reads a LEB128 varint, advancing `buf`.
pub fn get_varint<B: Buf>(buf: &mut B) -> Result<u64> {
    let mut value: u64 = 0;
    for index in 0..MAX_VARINT_LEN {
        if !buf.has_remaining() {
            return Err(WirecallError::Framing("truncated varint".to_string()));
        }
        let byte = buf.get_u8();
        let shift = 7 * index as u32;
        if index == MAX_VARINT_LEN - 1 && byte > 0x01 {
            return Err(WirecallError::Framing("varint overflows u64".to_string()));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(WirecallError::Framing("varint too long".to_string()))
}

/// Appends a length-prefixed UTF-8 string.
pub fn put_string(buf: &mut BytesMut, value: &str) {
    put_varint(buf, value.len() as u64);
    buf.put_slice(value.as_bytes());
}

/// Reads a length-prefixed byte string without validating UTF-8.
pub fn get_raw_string(buf: &mut Bytes) -> Result<Bytes> {
    let len = get_varint(buf)? as usize;
    if buf.remaining() < len {
        return Err(WirecallError::Framing(format!(
            "string length {} exceeds remaining {} bytes",
            len,
            buf.remaining()
        )));
    }
    Ok(buf.split_to(len))
}

/// Reads a length-prefixed UTF-8 string.
pub fn get_string(buf: &mut Bytes) -> Result<String> {
    let raw = get_raw_string(buf)?;
    String::from_utf8(raw.to_vec())
        .map_err(|e| WirecallError::Framing(format!("invalid UTF-8 in string: {}", e)))
}

/// Builds one frame, reserving the length prefix up front.
///
/// The prefix is written as a zero placeholder and patched by
/// [`finish`](Self::finish) once the whole frame, payload included, has been
/// encoded. Serialization strategies write directly into
/// [`payload_mut`](Self::payload_mut).
///
/// # Example
///
/// ```
/// use wirecall_common::protocol::wire::{FrameBuilder, decode_response};
///
/// let mut builder = FrameBuilder::response(7);
/// builder.payload_mut().extend_from_slice(b"ok");
/// let frame = builder.finish().unwrap();
///
/// let (id, payload) = decode_response(frame).unwrap();
/// assert_eq!(id, 7);
/// assert_eq!(&payload[..], b"ok");
/// ```
#[derive(Debug)]
pub struct FrameBuilder {
    buf: BytesMut,
}

impl FrameBuilder {
    /// Starts an empty frame containing only the length placeholder.
    pub fn new() -> Self {
        let mut buf = BytesMut::with_capacity(128);
        buf.put_u32(0);
        Self { buf }
    }

    /// Starts a request frame carrying the routing header.
    pub fn request(correlation_id: CorrelationId, service: &str, signature: &str) -> Self {
        let mut builder = Self::new();
        put_varint(&mut builder.buf, correlation_id);
        put_string(&mut builder.buf, service);
        put_string(&mut builder.buf, signature);
        builder
    }

    /// Starts a response frame for the given correlation id.
    pub fn response(correlation_id: CorrelationId) -> Self {
        let mut builder = Self::new();
        put_varint(&mut builder.buf, correlation_id);
        builder
    }

    /// Returns the sink that payload bytes are appended to.
    pub fn payload_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Number of bytes written so far, prefix included.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Always `false`: a frame holds at least its prefix.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Patches the total length and returns the finished frame.
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` if the frame cannot be described by a
    /// signed 32-bit length.
    pub fn finish(mut self) -> Result<Bytes> {
        let total = self.buf.len();
        if total > i32::MAX as usize {
            return Err(WirecallError::FrameTooLarge {
                size: total,
                max: i32::MAX as usize,
            });
        }
        self.buf[..LENGTH_PREFIX_LEN].copy_from_slice(&(total as i32).to_be_bytes());
        Ok(self.buf.freeze())
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Routing header of a decoded request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    /// Correlation id chosen by the client
    pub correlation_id: CorrelationId,
    /// Identifier of the target service
    pub service: String,
    /// Raw signature bytes, used directly as the method lookup key
    pub signature: Bytes,
}

impl RequestHeader {
    /// Signature as text, for diagnostics.
    pub fn signature_lossy(&self) -> String {
        String::from_utf8_lossy(&self.signature).into_owned()
    }
}

/// Validates the length prefix and returns the bytes that follow it.
fn strip_prefix(mut frame: Bytes) -> Result<Bytes> {
    if frame.len() < LENGTH_PREFIX_LEN {
        return Err(WirecallError::Framing(format!(
            "frame of {} bytes is shorter than its length prefix",
            frame.len()
        )));
    }
    let declared = frame.get_i32();
    let actual = frame.len() + LENGTH_PREFIX_LEN;
    if declared < LENGTH_PREFIX_LEN as i32 || declared as usize != actual {
        return Err(WirecallError::Framing(format!(
            "declared length {} does not match frame size {}",
            declared, actual
        )));
    }
    Ok(frame)
}

/// Splits a request frame into its header and the serialized arguments.
pub fn decode_request(frame: Bytes) -> Result<(RequestHeader, Bytes)> {
    let mut body = strip_prefix(frame)?;
    let correlation_id = get_varint(&mut body)?;
    let service = get_string(&mut body)?;
    let signature = get_raw_string(&mut body)?;
    Ok((
        RequestHeader {
            correlation_id,
            service,
            signature,
        },
        body,
    ))
}

/// Splits a response frame into its correlation id and result payload.
pub fn decode_response(frame: Bytes) -> Result<(CorrelationId, Bytes)> {
    let mut body = strip_prefix(frame)?;
    let correlation_id = get_varint(&mut body)?;
    Ok((correlation_id, body))
}

/// Reads the correlation id that follows the length prefix without
/// consuming the frame.
pub fn peek_correlation_id(frame: &[u8]) -> Result<CorrelationId> {
    if frame.len() < LENGTH_PREFIX_LEN {
        return Err(WirecallError::Framing("frame too short".to_string()));
    }
    let mut rest = &frame[LENGTH_PREFIX_LEN..];
    get_varint(&mut rest)
}
