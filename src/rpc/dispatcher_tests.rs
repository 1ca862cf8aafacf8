//! Tests for the multiplexing dispatcher.

use bytes::{BufMut, Bytes, BytesMut};
use futures::StreamExt;
use rstest::rstest;
use tokio::{
    io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf},
    time::{Duration, timeout},
};
use tokio_util::codec::FramedRead;
use tracing_test::traced_test;

use super::{DispatchError, DispatcherHandle};
use crate::{
    codec::{LengthFieldDecoder, RecoveryPolicy},
    config::RpcClientConfig,
    rpc::{HEADER_LEN, RpcRequest, RpcResponse, correlation_id, frame_config},
};

/// Server end of an in-memory RPC transport.
struct Peer {
    frames: FramedRead<ReadHalf<DuplexStream>, LengthFieldDecoder>,
    writer: WriteHalf<DuplexStream>,
}

impl Peer {
    async fn next_request_id(&mut self) -> u64 {
        let frame = timeout(Duration::from_secs(1), self.frames.next())
            .await
            .expect("request in time")
            .expect("request frame")
            .expect("transport")
            .expect("valid frame");
        correlation_id(&frame).expect("correlation id")
    }

    async fn write(&mut self, bytes: &[u8]) { self.writer.write_all(bytes).await.expect("write"); }

    async fn respond(&mut self, id: u64, payload: impl Into<Bytes>) {
        let mut buf = BytesMut::new();
        RpcResponse::new(id, payload).encode(&mut buf).expect("encode");
        self.write(&buf).await;
    }
}

fn connected(config: RpcClientConfig) -> (DispatcherHandle, Peer) {
    connected_through(64 * 1024, config)
}

fn connected_through(capacity: usize, config: RpcClientConfig) -> (DispatcherHandle, Peer) {
    let (client, server) = tokio::io::duplex(capacity);
    let (reader, writer) = tokio::io::split(server);
    let decoder = LengthFieldDecoder::new(frame_config(1024 * 1024).expect("config"));
    (
        DispatcherHandle::spawn(client, config),
        Peer {
            frames: FramedRead::new(reader, decoder),
            writer,
        },
    )
}

fn request() -> RpcRequest {
    RpcRequest::new("com.example.HelloService", "hash")
        .parameter_types("Ljava/lang/String;")
        .parameter("123456")
}

#[tokio::test]
async fn reverse_order_responses_reach_their_callers() {
    let (dispatcher, mut peer) = connected(RpcClientConfig::default());
    let calls: Vec<_> = (0..3).map(|_| dispatcher.send(request())).collect();
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(peer.next_request_id().await);
    }
    for id in ids.iter().rev() {
        peer.respond(*id, format!("result-{id}")).await;
    }
    for call in calls {
        let id = call.id();
        let response = call.await.expect("response");
        assert_eq!(response.id(), id);
        assert_eq!(response.payload().as_ref(), format!("result-{id}").as_bytes());
    }
    assert_eq!(dispatcher.pending_count().await.expect("count"), 0);
}

#[tokio::test]
async fn responses_are_read_while_requests_are_backed_up() {
    const CALLS: usize = 32;
    let (dispatcher, mut peer) = connected_through(256, RpcClientConfig::default());
    let calls: Vec<_> = (0..CALLS).map(|_| dispatcher.send(request())).collect();
    let server = tokio::spawn(async move {
        for _ in 0..CALLS {
            let id = peer.next_request_id().await;
            peer.respond(id, vec![b'x'; 2048]).await;
        }
    });

    let results = timeout(Duration::from_secs(5), futures::future::join_all(calls))
        .await
        .expect("calls must not stall");
    for result in results {
        assert_eq!(result.expect("response").payload().len(), 2048);
    }
    server.await.expect("peer");
    assert_eq!(dispatcher.pending_count().await.expect("count"), 0);
}

#[tokio::test]
async fn assigned_ids_are_distinct_and_explicit_ids_are_kept() {
    let (dispatcher, _peer) = connected(RpcClientConfig::default());
    let first = dispatcher.send(request());
    let second = dispatcher.send(request());
    let explicit = dispatcher.send(request().with_id(1000));
    assert_ne!(first.id(), second.id());
    assert_eq!(explicit.id(), 1000);
}

#[tokio::test]
async fn close_fails_every_pending_call() {
    let (dispatcher, mut peer) = connected(RpcClientConfig::default());
    let calls: Vec<_> = (0..3).map(|_| dispatcher.send(request())).collect();
    for _ in 0..3 {
        peer.next_request_id().await;
    }
    assert_eq!(dispatcher.pending_count().await.expect("count"), 3);

    dispatcher.close();
    for call in calls {
        assert!(matches!(call.await, Err(DispatchError::ChannelClosed)));
    }
    dispatcher.closed().await;
    assert!(dispatcher.is_closed());
    assert!(matches!(
        dispatcher.send(request()).await,
        Err(DispatchError::ChannelClosed)
    ));
    assert!(matches!(
        dispatcher.pending_count().await,
        Err(DispatchError::ChannelClosed)
    ));
}

#[tokio::test]
async fn send_queued_behind_close_fails() {
    let (dispatcher, _peer) = connected(RpcClientConfig::default());
    dispatcher.close();
    let late = dispatcher.send(request());
    assert!(matches!(late.await, Err(DispatchError::ChannelClosed)));
}

#[traced_test]
#[tokio::test]
async fn cancelled_call_is_forgotten_and_late_response_dropped() {
    let (dispatcher, mut peer) = connected(RpcClientConfig::default());
    let abandoned = dispatcher.send(request());
    let id = peer.next_request_id().await;
    abandoned.cancel();
    assert_eq!(dispatcher.pending_count().await.expect("count"), 0);

    peer.respond(id, "late").await;
    let next = dispatcher.send(request());
    let next_id = peer.next_request_id().await;
    peer.respond(next_id, "fresh").await;
    let response = next.await.expect("response");
    assert_eq!(response.payload().as_ref(), b"fresh");
    assert!(logs_contain("dropping response with no pending call"));
}

#[tokio::test]
async fn dropped_future_cancels_the_call() {
    let (dispatcher, _peer) = connected(RpcClientConfig::default());
    drop(dispatcher.send(request()));
    assert_eq!(dispatcher.pending_count().await.expect("count"), 0);
}

#[tokio::test]
async fn duplicate_id_is_rejected_without_disturbing_the_original() {
    let (dispatcher, mut peer) = connected(RpcClientConfig::default());
    let original = dispatcher.send(request().with_id(7));
    let duplicate = dispatcher.send(request().with_id(7));
    assert!(matches!(duplicate.await, Err(DispatchError::DuplicateId(7))));

    assert_eq!(peer.next_request_id().await, 7);
    peer.respond(7, "ok").await;
    let response = original.await.expect("original still resolves");
    assert_eq!(response.payload().as_ref(), b"ok");
}

#[tokio::test]
async fn peer_close_fails_pending_calls() {
    let (dispatcher, mut peer) = connected(RpcClientConfig::default());
    let call = dispatcher.send(request());
    peer.next_request_id().await;
    drop(peer);
    assert!(matches!(call.await, Err(DispatchError::ChannelClosed)));
    dispatcher.closed().await;
}

#[tokio::test]
async fn bad_magic_fails_only_the_matching_call() {
    let (dispatcher, mut peer) = connected(RpcClientConfig::default());
    let call = dispatcher.send(request());
    let id = peer.next_request_id().await;

    let mut frame = BytesMut::with_capacity(HEADER_LEN);
    frame.put_u16(0x1234);
    frame.put_u8(0x06);
    frame.put_u8(20);
    frame.put_u64(id);
    frame.put_u32(0);
    peer.write(&frame).await;

    assert!(matches!(
        call.await,
        Err(DispatchError::MalformedResponse { id: got, .. }) if got == id
    ));
    assert!(!dispatcher.is_closed());
}

/// Header announcing a body far beyond the default frame limit.
fn oversized_frame() -> BytesMut {
    let body = 5000;
    let mut frame = BytesMut::new();
    frame.put_u16(0xdabb);
    frame.put_u8(0x06);
    frame.put_u8(20);
    frame.put_u64(u64::MAX);
    frame.put_u32(u32::try_from(body).expect("body length"));
    frame.put_bytes(0, body);
    frame
}

#[rstest]
#[case::drop(RecoveryPolicy::Drop)]
#[case::disconnect(RecoveryPolicy::Disconnect)]
#[tokio::test]
async fn oversized_response_follows_recovery_policy(#[case] policy: RecoveryPolicy) {
    let (dispatcher, mut peer) = connected(RpcClientConfig::default().with_recovery(policy));
    let call = dispatcher.send(request());
    let id = peer.next_request_id().await;
    let mut wire = oversized_frame();
    RpcResponse::new(id, "after").encode(&mut wire).expect("encode");
    peer.write(&wire).await;

    let result = timeout(Duration::from_secs(1), call).await.expect("call settles");
    match policy {
        RecoveryPolicy::Drop => {
            assert_eq!(result.expect("response").payload().as_ref(), b"after");
            assert!(!dispatcher.is_closed());
        }
        RecoveryPolicy::Disconnect => {
            assert!(matches!(result, Err(DispatchError::ChannelClosed)));
            dispatcher.closed().await;
        }
    }
}
