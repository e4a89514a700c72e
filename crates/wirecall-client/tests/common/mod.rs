//! Helpers shared by the client integration tests: a hand-driven peer that
//! speaks the frame format over a plain tokio socket.

#![allow(dead_code)]

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use wirecall_common::protocol::wire::{self, FrameBuilder};
use wirecall_common::{Fault, SerializationStrategy};

/// Reads one frame, length prefix included. `None` on EOF or error.
pub async fn read_frame(stream: &mut TcpStream) -> Option<Bytes> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await.ok()?;
    let len = i32::from_be_bytes(prefix) as usize;
    let mut frame = BytesMut::with_capacity(len);
    frame.extend_from_slice(&prefix);
    frame.resize(len, 0);
    stream.read_exact(&mut frame[4..]).await.ok()?;
    Some(frame.freeze())
}

pub fn correlation_id(frame: &Bytes) -> u64 {
    wire::peek_correlation_id(frame).unwrap()
}

pub fn request_frame(correlation_id: u64) -> Bytes {
    FrameBuilder::request(correlation_id, "svc", "ping()")
        .finish()
        .unwrap()
}

pub fn ok_frame<R: Serialize>(correlation_id: u64, value: R) -> Bytes {
    let mut builder = FrameBuilder::response(correlation_id);
    SerializationStrategy::Json
        .encode_result(&Ok::<R, Fault>(value), builder.payload_mut())
        .unwrap();
    builder.finish().unwrap()
}

pub fn fault_frame(correlation_id: u64, fault: Fault) -> Bytes {
    let mut builder = FrameBuilder::response(correlation_id);
    SerializationStrategy::Json
        .encode_result(&Err::<(), Fault>(fault), builder.payload_mut())
        .unwrap();
    builder.finish().unwrap()
}

pub async fn write_frame(stream: &mut TcpStream, frame: &Bytes) {
    stream.write_all(frame).await.unwrap();
}

/// Polls `condition` every 10 ms until it holds or `timeout` elapses.
pub async fn wait_for(condition: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
