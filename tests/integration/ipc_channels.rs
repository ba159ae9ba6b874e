//! IPC channels over real sockets
//!
//! - handshake rejects malformed configuration frames
//! - info requests without a daemon time out
//! - fan-in of many senders into one sink

use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use nms_poller::ipc::{
    Envelope, IpcError, Message, Tag,
    handshake::HandshakeClient,
    info::get_info,
    push::{PullServer, PushSocket},
};
use tokio::net::TcpListener;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Answer the first `INIT` with a raw envelope
async fn raw_supervisor(reply: Envelope) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut packets = Framed::new(stream, LengthDelimitedCodec::new());
        let init = packets.next().await.unwrap().unwrap();
        assert_eq!(init[0], Tag::Init as u8);
        packets.send(reply.encode().unwrap()).await.unwrap();
        // keep the connection open until the worker gives up
        let _ = packets.next().await;
    });
    addr
}

#[tokio::test]
async fn test_conf_with_two_frames_is_fatal() {
    let addr = raw_supervisor(Envelope::new(
        Tag::Conf,
        vec![Bytes::from_static(b"{}"), Bytes::from_static(b"{}")],
    ))
    .await;

    let result = HandshakeClient::init_and_config(addr, Duration::from_secs(1)).await;
    assert_matches!(
        result.err(),
        Some(IpcError::FrameCount {
            expected: 1,
            got: 2,
            ..
        })
    );
}

#[tokio::test]
async fn test_conf_with_garbage_payload_is_fatal() {
    let addr = raw_supervisor(Envelope::new(
        Tag::Conf,
        vec![Bytes::from_static(b"not a config")],
    ))
    .await;

    let result = HandshakeClient::init_and_config(addr, Duration::from_secs(1)).await;
    assert_matches!(result.err(), Some(IpcError::Payload(_)));
}

#[tokio::test]
async fn test_unknown_tag_is_fatal() {
    let addr = raw_supervisor(Envelope {
        tag: 0x7f,
        frames: vec![],
    })
    .await;

    let result = HandshakeClient::init_and_config(addr, Duration::from_secs(1)).await;
    assert_matches!(result.err(), Some(IpcError::UnknownTag(0x7f)));
}

#[tokio::test]
async fn test_info_without_daemon_is_none() {
    // accepts but never answers
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let start = Instant::now();
    assert_eq!(get_info(addr, Duration::from_millis(200)).await, None);
    assert!(start.elapsed() < Duration::from_secs(1));
    drop(listener);
}

#[tokio::test]
async fn test_many_senders_one_sink() {
    let mut sink = PullServer::bind("127.0.0.1:0".parse().unwrap(), 64)
        .await
        .unwrap();
    let addr = sink.local_addr();

    let mut senders = vec![];
    for _ in 0..3 {
        senders.push(tokio::spawn(async move {
            let mut push = PushSocket::new(addr);
            for _ in 0..5 {
                push.send(Message::Ready).await.unwrap();
            }
        }));
    }
    for sender in senders {
        sender.await.unwrap();
    }

    let mut received = 0;
    while received < 15 {
        let message = tokio::time::timeout(Duration::from_secs(1), sink.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message, Message::Ready);
        received += 1;
    }
}
