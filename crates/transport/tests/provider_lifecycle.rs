//! Provider lifecycle tests: start/shutdown semantics, accept-failure
//! survival, and the accept-to-server-session path.

mod common;

use bytes::Bytes;
use common::{
    AcceptScript, RecordingHandler, StubIo, StubListener, StubReactor, stub_provider, test_addr,
    wait_for, wire_blob,
};
use keel_transport::{ChannelKind, Error, Message, NetworkError};
use std::sync::Arc;
use tokio_test::assert_ok;
use std::time::Duration;

#[tokio::test]
async fn test_start_twice_is_already_running() {
    let reactor = StubReactor::new();
    let handler = RecordingHandler::new();
    reactor.script_listener(StubListener::new(test_addr(7100), Vec::new()));
    reactor.script_listener(StubListener::new(test_addr(7100), Vec::new()));

    let provider = stub_provider(Arc::clone(&reactor), Arc::clone(&handler));
    tokio_test::assert_ok!(provider.start(ChannelKind::Stream, 7100, false).await);
    assert!(provider.is_listening());
    assert_eq!(provider.local_addr(), Some(test_addr(7100)));

    let second = provider.start(ChannelKind::Stream, 7100, false).await;
    assert!(matches!(
        second,
        Err(Error::Network(NetworkError::AlreadyRunning))
    ));

    // After an explicit shutdown the provider may start again.
    provider.shutdown();
    assert!(!provider.is_listening());
    tokio_test::assert_ok!(provider.start(ChannelKind::Stream, 7100, false).await);
    assert!(provider.is_listening());
}

#[tokio::test]
async fn test_accept_failure_leaves_the_listener_usable() {
    let reactor = StubReactor::new();
    let handler = RecordingHandler::new();

    let peer = test_addr(40001);
    let (io, _feeder) = StubIo::new(peer);
    reactor.script_listener(StubListener::new(
        test_addr(7101),
        vec![
            AcceptScript::Fail(std::io::ErrorKind::ConnectionAborted),
            AcceptScript::Succeed(io, peer),
        ],
    ));

    let provider = stub_provider(Arc::clone(&reactor), Arc::clone(&handler));
    provider.start(ChannelKind::Stream, 7101, false).await.unwrap();

    // The failing accept is skipped, the next one still yields a session.
    wait_for("the second accept to land", || handler.accepted_count() == 1).await;
    assert!(provider.is_listening());
    assert_eq!(handler.accepted.lock()[0].remote(), peer);
    assert_eq!(handler.disconnected_count(), 0);
}

#[tokio::test]
async fn test_accepted_session_reads_from_birth() {
    let reactor = StubReactor::new();
    let handler = RecordingHandler::new();

    let peer = test_addr(40002);
    let (io, feeder) = StubIo::new(peer);
    reactor.script_listener(StubListener::new(
        test_addr(7102),
        vec![AcceptScript::Succeed(Arc::clone(&io), peer)],
    ));

    let provider = stub_provider(Arc::clone(&reactor), Arc::clone(&handler));
    provider.start(ChannelKind::Stream, 7102, false).await.unwrap();

    // The first read is armed without anyone touching the session.
    wait_for("the accepted session to arm a read", || {
        io.recv_armed_count() >= 1
    })
    .await;

    feeder.feed_bytes(&wire_blob(&[Message::request(7, Bytes::from_static(b"hi"))]));
    wait_for("the message to surface", || handler.message_count() == 1).await;
    assert_eq!(handler.messages.lock()[0].0, peer);
}

#[tokio::test]
async fn test_server_session_failure_notifies_and_closes() {
    let reactor = StubReactor::new();
    let handler = RecordingHandler::new();

    let peer = test_addr(40003);
    let (io, feeder) = StubIo::new(peer);
    reactor.script_listener(StubListener::new(
        test_addr(7103),
        vec![AcceptScript::Succeed(Arc::clone(&io), peer)],
    ));

    let provider = stub_provider(Arc::clone(&reactor), Arc::clone(&handler));
    provider.start(ChannelKind::Stream, 7103, false).await.unwrap();
    wait_for("the session to arm a read", || io.recv_armed_count() >= 1).await;

    // Peer hangup: end of stream.
    feeder.feed_eof();

    wait_for("the disconnect notification", || {
        handler.disconnected_count() == 1
    })
    .await;
    assert_eq!(handler.disconnected.lock()[0], peer);
    assert!(io.was_closed());
    // The listener is unaffected by a dying session.
    assert!(provider.is_listening());
}

#[tokio::test]
async fn test_server_session_write_frames_messages() {
    let reactor = StubReactor::new();
    let handler = RecordingHandler::new();

    let peer = test_addr(40004);
    let (io, _feeder) = StubIo::new(peer);
    reactor.script_listener(StubListener::new(
        test_addr(7104),
        vec![AcceptScript::Succeed(Arc::clone(&io), peer)],
    ));

    let provider = stub_provider(Arc::clone(&reactor), Arc::clone(&handler));
    provider.start(ChannelKind::Stream, 7104, false).await.unwrap();
    wait_for("the accepted session", || handler.accepted_count() == 1).await;

    let session = Arc::clone(&handler.accepted.lock()[0]);
    session.write(Message::response(3, Bytes::from_static(b"reply")));

    wait_for("the send to complete", || !io.sent().is_empty()).await;
    let decoded = common::decode_all(&io.sent()[0]);
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].header.id, 3);
    assert_eq!(decoded[0].payload, Bytes::from_static(b"reply"));

    // Writes do not disturb the session.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(handler.disconnected_count(), 0);
}
