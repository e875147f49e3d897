mod common;

use std::collections::BTreeSet;
use std::io;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use shroud_core::frame::Closing;
use shroud_mux::{MuxError, Session, SessionId, SessionSide, StreamId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use common::*;

fn client(unordered: bool) -> Session {
    Session::new(SessionId(7), config(SessionSide::Client, unordered))
}

#[tokio::test]
async fn test_close_keeps_residual_data_readable() {
    for unordered in [false, true] {
        let session = client(unordered);
        let mut peer = injector(&session, plain());
        peer.send(data(2, 0, b"abc")).await.unwrap();

        let stream = timeout(TIMEOUT, session.accept()).await.unwrap().unwrap();
        assert_eq!(stream.id(), StreamId(2));
        stream.close().await.unwrap();
        assert!(!session.contains_stream(StreamId(2)));
        assert!(stream.has_residual());

        let mut buf = [0u8; 3];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"abc");
        assert!(matches!(stream.read(&mut buf).await, Err(MuxError::BrokenStream)));
        session.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_session_close_keeps_residual_data_readable() {
    for unordered in [false, true] {
        let session = client(unordered);
        let mut peer = injector(&session, plain());
        peer.send(data(2, 0, b"abc")).await.unwrap();

        let stream = timeout(TIMEOUT, session.accept()).await.unwrap().unwrap();
        session.close().await.unwrap();
        assert!(stream.is_closed());
        assert_eq!(session.stream_count(), 0);

        let mut buf = [0u8; 3];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"abc");
        assert!(matches!(stream.read(&mut buf).await, Err(MuxError::BrokenStream)));
    }
}

#[tokio::test]
async fn test_zero_length_read_never_blocks_or_consumes() {
    let session = client(false);
    let mut peer = injector(&session, plain());
    let idle = session.open_stream().unwrap();
    assert_eq!(idle.read(&mut []).await.unwrap(), 0);

    peer.send(data(2, 0, b"xyz")).await.unwrap();
    let stream = timeout(TIMEOUT, session.accept()).await.unwrap().unwrap();
    assert_eq!(stream.read(&mut []).await.unwrap(), 0);
    stream.close().await.unwrap();
    assert_eq!(stream.read(&mut []).await.unwrap(), 0);
    session.close().await.unwrap();
    assert_eq!(stream.read(&mut []).await.unwrap(), 0);

    let mut buf = [0u8; 8];
    assert_eq!(stream.read(&mut buf).await.unwrap(), 3);
    assert_eq!(&buf[..3], b"xyz");
}

#[tokio::test]
async fn test_ordered_stream_restores_sequence() {
    let session = client(false);
    let mut peer = injector(&session, plain());
    peer.send(data(2, 2, b"cc")).await.unwrap();
    peer.send(data(2, 1, b"bb")).await.unwrap();

    let stream = timeout(TIMEOUT, session.accept()).await.unwrap().unwrap();
    let mut buf = [0u8; 16];
    // Sequence 0 is still missing.
    assert!(timeout(Duration::from_millis(50), stream.read(&mut buf)).await.is_err());

    peer.send(data(2, 0, b"aa")).await.unwrap();
    let mut out = Vec::new();
    while out.len() < 6 {
        let n = timeout(TIMEOUT, stream.read(&mut buf)).await.unwrap().unwrap();
        out.extend_from_slice(&buf[..n]);
    }
    assert_eq!(out, b"aabbcc");
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_ordered_close_waits_for_earlier_data() {
    let session = client(false);
    let mut peer = injector(&session, plain());
    peer.send(data(2, 0, b"one")).await.unwrap();
    let stream = timeout(TIMEOUT, session.accept()).await.unwrap().unwrap();

    // The close overtakes the second data frame on the wire.
    peer.send(control(2, 2, Closing::Graceful)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!stream.is_closed());
    peer.send(data(2, 1, b"two")).await.unwrap();

    let mut stream = stream;
    let mut out = Vec::new();
    timeout(TIMEOUT, stream.read_to_end(&mut out)).await.unwrap().unwrap();
    assert_eq!(out, b"onetwo");
    assert!(stream.is_closed());
    assert!(!session.contains_stream(StreamId(2)));
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_unordered_stream_delivers_in_arrival_order() {
    let session = client(true);
    let mut peer = injector(&session, plain());
    peer.send(data(2, 2, b"late")).await.unwrap();

    let stream = timeout(TIMEOUT, session.accept()).await.unwrap().unwrap();
    let mut buf = [0u8; 16];
    let n = timeout(TIMEOUT, stream.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"late");

    peer.send(data(2, 0, b"early")).await.unwrap();
    let n = timeout(TIMEOUT, stream.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"early");
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_reset_discards_buffered_data() {
    let session = client(false);
    let mut peer = injector(&session, plain());
    peer.send(data(2, 0, b"doomed")).await.unwrap();
    let stream = timeout(TIMEOUT, session.accept()).await.unwrap().unwrap();

    peer.send(control(2, 1, Closing::Reset)).await.unwrap();
    wait_until(|| stream.is_reset()).await;
    assert!(!session.contains_stream(StreamId(2)));
    assert!(!stream.has_residual());

    let mut buf = [0u8; 8];
    assert!(matches!(stream.read(&mut buf).await, Err(MuxError::BrokenStream)));
    let mut handle = stream.clone();
    let err = AsyncReadExt::read(&mut handle, &mut buf).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    assert!(matches!(stream.write(b"more").await, Err(MuxError::BrokenStream)));
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_local_reset_sends_reset_frame() {
    let session = client(false);
    let mut wire = tap(&session);
    let stream = session.open_stream().unwrap();
    stream.write(b"hello").await.unwrap();
    stream.reset().await.unwrap();
    assert!(stream.is_reset());
    assert!(!session.contains_stream(stream.id()));

    let first = timeout(TIMEOUT, wire.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(first.payload.as_ref(), b"hello");
    let second = timeout(TIMEOUT, wire.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(second.stream_id, stream.id());
    assert_eq!(second.seq.value(), 1);
    assert_eq!(second.closing, Closing::Reset);
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_close_is_numbered_after_concurrent_writes() {
    let session = Session::new(
        SessionId(7),
        config(SessionSide::Client, false).with_max_frame_payload(64),
    );
    let mut wire = tap(&session);
    let stream = session.open_stream().unwrap();

    let mut writers = Vec::new();
    for w in 0..4u8 {
        let handle = stream.clone();
        writers.push(tokio::spawn(async move {
            for _ in 0..5 {
                handle.write(&[w; 150]).await.unwrap();
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }
    stream.close().await.unwrap();
    stream.close().await.unwrap();

    let mut seqs = BTreeSet::new();
    let close_seq = loop {
        let frame = timeout(TIMEOUT, wire.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(frame.stream_id, stream.id());
        if frame.closing.is_graceful() {
            break frame.seq.value();
        }
        assert!(frame.payload_len() <= 64);
        assert!(seqs.insert(frame.seq.value()));
    };
    // 20 writes of 150 bytes, three frames each.
    assert_eq!(seqs, (0..60).collect::<BTreeSet<u64>>());
    assert_eq!(close_seq, 60);

    assert!(matches!(stream.write(b"after").await, Err(MuxError::BrokenStream)));
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_remote_close_reads_as_eof() {
    let (client, server) = session_pair(1, config(SessionSide::Client, false), config(SessionSide::Server, false));
    let mut outbound = client.open_stream().unwrap();
    outbound.write_all(b"goodbye").await.unwrap();
    outbound.shutdown().await.unwrap();
    assert!(!client.contains_stream(outbound.id()));

    let mut inbound = timeout(TIMEOUT, server.accept()).await.unwrap().unwrap();
    assert_eq!(inbound.id(), outbound.id());
    let mut out = Vec::new();
    timeout(TIMEOUT, inbound.read_to_end(&mut out)).await.unwrap().unwrap();
    assert_eq!(out, b"goodbye");
    assert!(!server.contains_stream(inbound.id()));
    assert!(matches!(inbound.write(b"reply").await, Err(MuxError::BrokenStream)));

    client.close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_zero_frame_payload_setting_still_writes() {
    let mut settings = config(SessionSide::Client, false);
    settings.max_frame_payload = 0;
    let session = Session::new(SessionId(7), settings);
    let mut wire = tap(&session);
    let stream = session.open_stream().unwrap();

    let written = timeout(TIMEOUT, stream.write(b"hello")).await.unwrap().unwrap();
    assert_eq!(written, 5);
    let frame = timeout(TIMEOUT, wire.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(frame.payload.as_ref(), b"hello");
    session.close().await.unwrap();
}
