#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use shroud_core::codec::FrameCodec;
use shroud_core::frame::{Closing, Frame};
use shroud_core::obfs::{Obfuscator, PlainObfuscator};
use shroud_core::stream::{Seq, StreamId};
use shroud_mux::{Session, SessionConfig, SessionId, SessionSide};
use tokio::io::DuplexStream;
use tokio_util::codec::{FramedRead, FramedWrite};

pub const TIMEOUT: Duration = Duration::from_secs(10);
pub const PIPE_CAPACITY: usize = 64 * 1024;

pub fn config(side: SessionSide, unordered: bool) -> SessionConfig {
    SessionConfig::new().with_side(side).with_unordered(unordered)
}

/// Two sessions joined by `connections` in-memory pipes.
pub fn session_pair(connections: usize, client: SessionConfig, server: SessionConfig) -> (Session, Session) {
    let client = Session::new(SessionId(1), client.with_side(SessionSide::Client));
    let server = Session::new(SessionId(1), server.with_side(SessionSide::Server));
    for _ in 0..connections {
        let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
        client.add_connection(a).unwrap();
        server.add_connection(b).unwrap();
    }
    (client, server)
}

/// Attach a pipe to `session` and return a frame writer for its far end,
/// standing in for a peer.
pub fn injector(session: &Session, obfuscator: Arc<dyn Obfuscator>) -> FramedWrite<DuplexStream, FrameCodec> {
    let (near, far) = tokio::io::duplex(PIPE_CAPACITY);
    session.add_connection(near).unwrap();
    FramedWrite::new(far, FrameCodec::new(obfuscator))
}

/// Attach a pipe to `session` and return a frame reader for its far end.
pub fn tap(session: &Session) -> FramedRead<DuplexStream, FrameCodec> {
    let (near, far) = tokio::io::duplex(PIPE_CAPACITY);
    session.add_connection(near).unwrap();
    FramedRead::new(far, FrameCodec::new(Arc::new(PlainObfuscator)))
}

pub fn plain() -> Arc<dyn Obfuscator> {
    Arc::new(PlainObfuscator)
}

pub fn data(id: u32, seq: u64, payload: &[u8]) -> Frame {
    Frame::builder()
        .with_stream_id(StreamId(id))
        .with_seq(Seq(seq))
        .with_payload(Bytes::copy_from_slice(payload))
        .build()
}

pub fn control(id: u32, seq: u64, closing: Closing) -> Frame {
    Frame::builder()
        .with_stream_id(StreamId(id))
        .with_seq(Seq(seq))
        .with_closing(closing)
        .build()
}

/// Poll `cond` until it holds, failing the test after `TIMEOUT`.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
