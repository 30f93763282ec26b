//! Connection Tests
//!
//! Tests for framing over a real socket: reassembly of split messages,
//! oversized messages, timeouts, cancellation, and peer close.

#[path = "../common/mod.rs"]
mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::{test_config, MockStore};
use zlimdb_client::network::Connection;
use zlimdb_client::protocol::{encode_message, MessageType};
use zlimdb_client::{ClientConfig, ClientError};

fn small_config(max_message_size: usize) -> ClientConfig {
    ClientConfig::builder()
        .poll_interval(Duration::from_millis(20))
        .max_message_size(max_message_size)
        .build()
}

// =============================================================================
// Connect Tests
// =============================================================================

#[test]
fn test_open_rejects_malformed_address() {
    assert!(matches!(
        Connection::open("127.0.0.1:notaport", &test_config()),
        Err(ClientError::Resolve { .. })
    ));
}

#[test]
fn test_request_ids_start_at_one() {
    let store = MockStore::start(|peer| peer.wait_closed());
    let mut connection = Connection::open(store.address(), &test_config()).unwrap();

    assert_eq!(connection.next_request_id(), 1);
    assert_eq!(connection.next_request_id(), 2);
    assert_eq!(connection.next_request_id(), 3);
    assert!(connection.peer_addr().starts_with("127.0.0.1:"));

    drop(connection);
    store.join();
}

// =============================================================================
// Framing Tests
// =============================================================================

#[test]
fn test_send_and_receive() {
    let store = MockStore::start(|peer| {
        let request = peer.expect(MessageType::QueryRequest);
        assert_eq!(request.header().request_id, 1);
        peer.reply(MessageType::QueryResponse, 1, 0, b"rows");
        peer.wait_closed();
    });
    let mut connection = Connection::open(store.address(), &test_config()).unwrap();

    let id = connection.next_request_id();
    let request = encode_message(MessageType::QueryRequest, id, 0, &[0u8; 16]).unwrap();
    connection.send(&request).unwrap();

    let response = connection.receive(Some(Duration::from_secs(5))).unwrap();
    assert!(response.header().is(MessageType::QueryResponse));
    assert_eq!(response.payload(), b"rows");

    drop(connection);
    store.join();
}

#[test]
fn test_message_split_across_writes_is_reassembled() {
    let store = MockStore::start(|peer| {
        let message = encode_message(MessageType::AddResponse, 4, 0, &42u64.to_le_bytes()).unwrap();
        for byte in message.iter() {
            peer.send(&[*byte]);
            thread::sleep(Duration::from_millis(2));
        }
        peer.wait_closed();
    });
    let mut connection = Connection::open(store.address(), &test_config()).unwrap();

    let response = connection.receive(Some(Duration::from_secs(5))).unwrap();
    assert_eq!(response.header().request_id, 4);
    assert_eq!(response.payload(), &42u64.to_le_bytes());

    drop(connection);
    store.join();
}

#[test]
fn test_messages_in_one_write_are_split() {
    let store = MockStore::start(|peer| {
        let mut both = encode_message(MessageType::UpdateResponse, 1, 0, &[]).unwrap().to_vec();
        both.extend_from_slice(&encode_message(MessageType::RemoveResponse, 2, 0, &[]).unwrap());
        peer.send(&both);
        peer.wait_closed();
    });
    let mut connection = Connection::open(store.address(), &test_config()).unwrap();

    let first = connection.receive(Some(Duration::from_secs(5))).unwrap();
    let second = connection.receive(Some(Duration::from_secs(5))).unwrap();
    assert!(first.header().is(MessageType::UpdateResponse));
    assert!(second.header().is(MessageType::RemoveResponse));
    assert!(connection.try_receive().unwrap().is_none());

    drop(connection);
    store.join();
}

#[test]
fn test_oversized_inbound_message_is_skipped() {
    let store = MockStore::start(|peer| {
        peer.reply(MessageType::QueryResponse, 1, 0, &vec![7u8; 5000]);
        peer.reply(MessageType::AddResponse, 2, 0, &9u64.to_le_bytes());
        peer.wait_closed();
    });
    let mut connection = Connection::open(store.address(), &small_config(1024)).unwrap();

    let error = connection.receive(Some(Duration::from_secs(5))).unwrap_err();
    assert!(matches!(error, ClientError::MessageTooLarge { size: 5010, max: 1024 }));
    assert!(!error.is_fatal());

    let next = connection.receive(Some(Duration::from_secs(5))).unwrap();
    assert_eq!(next.header().request_id, 2);

    drop(connection);
    store.join();
}

#[test]
fn test_oversized_outbound_message_is_rejected() {
    let store = MockStore::start(|peer| peer.wait_closed());
    let mut connection = Connection::open(store.address(), &small_config(1024)).unwrap();

    let request = encode_message(MessageType::AddRequest, 1, 0, &[0u8; 2000]).unwrap();
    assert!(matches!(
        connection.send(&request),
        Err(ClientError::MessageTooLarge { size: 2010, max: 1024 })
    ));

    drop(connection);
    store.join();
}

// =============================================================================
// Timeout, Cancellation, and Close Tests
// =============================================================================

#[test]
fn test_receive_timeout() {
    let store = MockStore::start(|peer| peer.wait_closed());
    let mut connection = Connection::open(store.address(), &test_config()).unwrap();

    let start = Instant::now();
    let error = connection.receive(Some(Duration::from_millis(100))).unwrap_err();
    assert!(matches!(error, ClientError::Timeout(_)));
    assert!(!error.is_fatal());
    assert!(start.elapsed() >= Duration::from_millis(90));

    drop(connection);
    store.join();
}

#[test]
fn test_stop_cancels_receive() {
    let store = MockStore::start(|peer| peer.wait_closed());
    let mut connection = Connection::open(store.address(), &test_config()).unwrap();

    let running = connection.running_flag();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        running.store(false, std::sync::atomic::Ordering::Release);
    });

    let start = Instant::now();
    assert!(matches!(connection.receive(None), Err(ClientError::Cancelled)));
    assert!(start.elapsed() < Duration::from_secs(2));
    stopper.join().unwrap();

    drop(connection);
    store.join();
}

#[test]
fn test_peer_close_after_buffered_message() {
    let store = MockStore::start(|peer| {
        peer.reply(MessageType::AuthResponse, 1, 0, &[]);
    });
    let mut connection = Connection::open(store.address(), &test_config()).unwrap();
    store.join();

    let message = connection.receive(Some(Duration::from_secs(5))).unwrap();
    assert!(message.header().is(MessageType::AuthResponse));
    assert!(matches!(
        connection.receive(Some(Duration::from_secs(5))),
        Err(ClientError::ConnectionClosed)
    ));
    assert!(connection.is_peer_closed());
}
