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

use std::collections::VecDeque;
use std::io;

use bytes::{Buf, Bytes, BytesMut};

use crate::protocol::error::{Result, WirecallError};
use crate::protocol::wire::LENGTH_PREFIX_LEN;

/// Default maximum frame size (100 MB)
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Default output high-water mark (1 MiB)
pub const DEFAULT_HIGH_WATER_MARK: usize = 1024 * 1024;

/// Largest chunk requested from a source in one read call.
const READ_CHUNK: usize = 64 * 1024;

/// Non-blocking byte sink, e.g. a socket in non-blocking mode.
///
/// Returning `ErrorKind::WouldBlock` (or `Ok(0)`) means "try again after
/// the next write readiness".
pub trait ByteSink {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Non-blocking byte source.
///
/// `Ok(0)` means end of stream; `ErrorKind::WouldBlock` means no data yet.
pub trait ByteSource {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Result of queueing a frame for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    /// Frame queued. `was_empty` is set when nothing was queued before it,
    /// meaning the owner must arm write readiness.
    Accepted { was_empty: bool },
    /// Queue is at or above the high-water mark; frame not queued.
    Full,
}

/// Result of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// Nothing was queued
    WasEmpty,
    /// All queued output was written
    Empty,
    /// Output remains; the sink would block
    NotEmpty,
    /// Output remains and the queue is still at or above the high-water mark
    Full,
}

/// Outbound half of the framing codec: a queue of complete frames.
#[derive(Debug)]
pub struct FrameEncoder {
    queue: VecDeque<Bytes>,
    queued_bytes: usize,
    high_water_mark: usize,
}

impl FrameEncoder {
    pub fn new(high_water_mark: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            queued_bytes: 0,
            high_water_mark,
        }
    }

    /// Queues a complete frame built with [`FrameBuilder`](crate::protocol::wire::FrameBuilder).
    ///
    /// A frame larger than the high-water mark is still accepted when the
    /// queue is empty.
    pub fn write(&mut self, frame: Bytes) -> WriteState {
        if self.queued_bytes >= self.high_water_mark {
            return WriteState::Full;
        }
        let was_empty = self.queue.is_empty();
        self.queued_bytes += frame.len();
        self.queue.push_back(frame);
        WriteState::Accepted { was_empty }
    }

    /// Writes as much queued output as the sink accepts.
    pub fn flush<S: ByteSink + ?Sized>(&mut self, sink: &mut S) -> io::Result<FlushState> {
        if self.queue.is_empty() {
            return Ok(FlushState::WasEmpty);
        }

        while let Some(front) = self.queue.front_mut() {
            let written = match sink.try_write(front) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            front.advance(written);
            self.queued_bytes -= written;
            if front.is_empty() {
                self.queue.pop_front();
            }
        }

        Ok(if self.queue.is_empty() {
            FlushState::Empty
        } else if self.queued_bytes >= self.high_water_mark {
            FlushState::Full
        } else {
            FlushState::NotEmpty
        })
    }

    /// Bytes queued and not yet written.
    pub fn pending_bytes(&self) -> usize {
        self.queued_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drops all queued output.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.queued_bytes = 0;
    }
}

/// Inbound half of the framing codec: a resumable frame parser.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    expected: Option<usize>,
    max_frame_size: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK),
            expected: None,
            max_frame_size,
        }
    }

    /// Returns the next complete frame, reading from `source` only when the
    /// buffered bytes do not already hold one.
    ///
    /// Each read requests up to 64 KiB, so several small frames usually
    /// arrive in one call. Returns `Ok(None)` when the source would block;
    /// the partial frame is kept and parsing resumes on the next call. The
    /// returned frame includes its length prefix.
    ///
    /// # Errors
    ///
    /// * `Framing` / `FrameTooLarge` - invalid length prefix
    /// * `ConnectionClosed` - end of stream at a frame boundary
    /// * `Connection` - end of stream in the middle of a frame
    pub fn read<S: ByteSource + ?Sized>(&mut self, source: &mut S) -> Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.parse()? {
                return Ok(Some(frame));
            }

            let start = self.buf.len();
            self.buf.resize(start + READ_CHUNK, 0);
            let result = source.try_read(&mut self.buf[start..]);
            let n = result.as_ref().map_or(0, |n| *n);
            self.buf.truncate(start + n);

            match result {
                Ok(0) if start == 0 => return Err(WirecallError::ConnectionClosed),
                Ok(0) => {
                    return Err(WirecallError::Connection(format!(
                        "connection closed mid-frame ({} of {} bytes)",
                        start,
                        self.expected.unwrap_or(LENGTH_PREFIX_LEN)
                    )))
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Splits one complete frame off the buffer, if there is one.
    fn parse(&mut self) -> Result<Option<Bytes>> {
        if self.expected.is_none() {
            if self.buf.len() < LENGTH_PREFIX_LEN {
                return Ok(None);
            }
            let declared = i32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
            if declared < LENGTH_PREFIX_LEN as i32 {
                return Err(WirecallError::Framing(format!(
                    "invalid frame length {}",
                    declared
                )));
            }
            let declared = declared as usize;
            if declared > self.max_frame_size {
                return Err(WirecallError::FrameTooLarge {
                    size: declared,
                    max: self.max_frame_size,
                });
            }
            self.expected = Some(declared);
        }

        match self.expected {
            Some(len) if self.buf.len() >= len => {
                self.expected = None;
                Ok(Some(self.buf.split_to(len).freeze()))
            }
            _ => Ok(None),
        }
    }

    /// Returns `true` if a partial frame is buffered.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

/// Framing codec for one connection.
///
/// Combines the outbound queue and the inbound parser. A transport splits
/// it with [`into_parts`](Self::into_parts) so the reader task owns the
/// decoder while writers share the encoder.
#[derive(Debug)]
pub struct FrameCodec {
    pub encoder: FrameEncoder,
    pub decoder: FrameDecoder,
}

impl FrameCodec {
    pub fn new(high_water_mark: usize, max_frame_size: usize) -> Self {
        Self {
            encoder: FrameEncoder::new(high_water_mark),
            decoder: FrameDecoder::new(max_frame_size),
        }
    }

    pub fn write(&mut self, frame: Bytes) -> WriteState {
        self.encoder.write(frame)
    }

    pub fn flush<S: ByteSink + ?Sized>(&mut self, sink: &mut S) -> io::Result<FlushState> {
        self.encoder.flush(sink)
    }

    pub fn read<S: ByteSource + ?Sized>(&mut self, source: &mut S) -> Result<Option<Bytes>> {
        self.decoder.read(source)
    }

    pub fn into_parts(self) -> (FrameEncoder, FrameDecoder) {
        (self.encoder, self.decoder)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_WATER_MARK, MAX_FRAME_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire::FrameBuilder;

    /// Source that yields pre-cut chunks, reporting WouldBlock between them.
    struct ChunkedSource {
        chunks: VecDeque<Vec<u8>>,
        blocked: bool,
        eof: bool,
    }

    impl ChunkedSource {
        fn new(data: &[u8], sizes: &[usize], eof: bool) -> Self {
            let mut chunks = VecDeque::new();
            let mut offset = 0;
            let mut sizes = sizes.iter().cycle();
            while offset < data.len() {
                let size = (*sizes.next().unwrap()).max(1);
                let end = (offset + size).min(data.len());
                chunks.push_back(data[offset..end].to_vec());
                offset = end;
            }
            Self {
                chunks,
                blocked: false,
                eof,
            }
        }
    }

    impl ByteSource for ChunkedSource {
        fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            // alternate between data and WouldBlock
            if self.blocked {
                self.blocked = false;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            match self.chunks.front_mut() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    chunk.drain(..n);
                    if chunk.is_empty() {
                        self.chunks.pop_front();
                        self.blocked = true;
                    }
                    Ok(n)
                }
                None if self.eof => Ok(0),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    /// Sink that accepts a limited number of bytes per call.
    struct ThrottledSink {
        written: Vec<u8>,
        per_call: usize,
        budget: usize,
    }

    impl ByteSink for ThrottledSink {
        fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.per_call).min(self.budget);
            self.written.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }
    }

    fn frame(id: u64, payload: &[u8]) -> Bytes {
        let mut builder = FrameBuilder::response(id);
        builder.payload_mut().extend_from_slice(payload);
        builder.finish().unwrap()
    }

    fn drain(decoder: &mut FrameDecoder, source: &mut ChunkedSource) -> Vec<Bytes> {
        let mut frames = Vec::new();
        for _ in 0..10_000 {
            match decoder.read(source) {
                Ok(Some(f)) => frames.push(f),
                Ok(None) if source.chunks.is_empty() => break,
                Ok(None) => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        frames
    }

    #[test]
    fn test_decode_across_partitions() {
        let frames = vec![frame(1, b"alpha"), frame(2, b""), frame(300, &[7u8; 1000])];
        let stream: Vec<u8> = frames.iter().flat_map(|f| f.to_vec()).collect();

        for sizes in [&[1usize][..], &[2, 3], &[4], &[5, 1, 7], &[4096]] {
            let mut source = ChunkedSource::new(&stream, sizes, false);
            let mut decoder = FrameDecoder::new(MAX_FRAME_SIZE);
            let decoded = drain(&mut decoder, &mut source);
            assert_eq!(decoded, frames, "partition {:?}", sizes);
            assert!(!decoder.has_partial());
        }
    }

    /// Source that hands out everything it holds in one call.
    struct CountingSource {
        data: Vec<u8>,
        reads: usize,
    }

    impl ByteSource for CountingSource {
        fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reads += 1;
            if self.data.is_empty() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = self.data.len().min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data.drain(..n);
            Ok(n)
        }
    }

    #[test]
    fn test_buffered_frames_need_no_further_reads() {
        let frames: Vec<_> = (1..=3u64).map(|i| frame(i, &[i as u8; 10])).collect();
        let mut source = CountingSource {
            data: frames.iter().flat_map(|f| f.to_vec()).collect(),
            reads: 0,
        };
        let mut decoder = FrameDecoder::new(MAX_FRAME_SIZE);

        for expected in &frames {
            assert_eq!(decoder.read(&mut source).unwrap().as_ref(), Some(expected));
        }
        assert_eq!(source.reads, 1);

        assert_eq!(decoder.read(&mut source).unwrap(), None);
        assert_eq!(source.reads, 2);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_length_below_prefix_is_framing_error() {
        let mut source = ChunkedSource::new(&3i32.to_be_bytes(), &[4], false);
        let mut decoder = FrameDecoder::new(MAX_FRAME_SIZE);
        let err = decoder.read(&mut source).unwrap_err();
        assert!(matches!(err, WirecallError::Framing(_)));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut source = ChunkedSource::new(&1025i32.to_be_bytes(), &[4], false);
        let mut decoder = FrameDecoder::new(1024);
        let err = decoder.read(&mut source).unwrap_err();
        assert!(matches!(err, WirecallError::FrameTooLarge { size: 1025, max: 1024 }));
    }

    #[test]
    fn test_eof_at_boundary_is_clean() {
        let f = frame(1, b"x");
        let mut source = ChunkedSource::new(&f, &[f.len()], true);
        let mut decoder = FrameDecoder::new(MAX_FRAME_SIZE);
        assert_eq!(decoder.read(&mut source).unwrap(), Some(f));
        // WouldBlock after chunk, then EOF
        assert_eq!(decoder.read(&mut source).unwrap(), None);
        assert!(matches!(
            decoder.read(&mut source),
            Err(WirecallError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_eof_mid_frame_is_connection_failure() {
        let f = frame(1, b"hello");
        let mut source = ChunkedSource::new(&f[..6], &[6], true);
        let mut decoder = FrameDecoder::new(MAX_FRAME_SIZE);
        assert_eq!(decoder.read(&mut source).unwrap(), None);
        assert!(matches!(
            decoder.read(&mut source),
            Err(WirecallError::Connection(_))
        ));
    }

    #[test]
    fn test_write_reports_was_empty_then_full() {
        let mut encoder = FrameEncoder::new(16);
        assert_eq!(
            encoder.write(frame(1, &[0; 20])),
            WriteState::Accepted { was_empty: true }
        );
        // over the mark now
        assert_eq!(encoder.write(frame(2, b"")), WriteState::Full);
        assert_eq!(encoder.pending_bytes(), 25);
    }

    #[test]
    fn test_flush_states() {
        let mut encoder = FrameEncoder::new(16);
        let mut sink = ThrottledSink {
            written: Vec::new(),
            per_call: 4,
            budget: 0,
        };
        assert_eq!(encoder.flush(&mut sink).unwrap(), FlushState::WasEmpty);

        let big = frame(1, &[1; 30]);
        encoder.write(big.clone());
        assert_eq!(encoder.flush(&mut sink).unwrap(), FlushState::Full);

        sink.budget = 20;
        assert_eq!(encoder.flush(&mut sink).unwrap(), FlushState::NotEmpty);

        sink.budget = usize::MAX;
        assert_eq!(encoder.flush(&mut sink).unwrap(), FlushState::Empty);
        assert_eq!(sink.written, big.to_vec());
        assert!(encoder.is_empty());
    }

    #[test]
    fn test_flush_preserves_frame_order() {
        let mut codec = FrameCodec::default();
        let frames: Vec<_> = (0..5u64).map(|i| frame(i, &[i as u8; 3])).collect();
        for f in &frames {
            assert!(matches!(codec.write(f.clone()), WriteState::Accepted { .. }));
        }
        let mut sink = ThrottledSink {
            written: Vec::new(),
            per_call: 3,
            budget: usize::MAX,
        };
        assert_eq!(codec.flush(&mut sink).unwrap(), FlushState::Empty);

        let mut source = ChunkedSource::new(&sink.written, &[11], false);
        let decoded = drain(&mut codec.decoder, &mut source);
        assert_eq!(decoded, frames);
    }
}
