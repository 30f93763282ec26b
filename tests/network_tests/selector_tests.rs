//! Selector Tests
//!
//! Tests for readiness delivery, interest changes, and the wake channel.

use std::io::Write;
use std::net::{TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::thread;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::Token;
use zlimdb_client::network::{Interest, Selected, Selector, WAKE_TOKEN};

const LISTENER: Token = Token(1);
const STREAM: Token = Token(2);

// =============================================================================
// Helper Functions
// =============================================================================

/// Wait until `token` reports readiness covering part of `interest`
fn wait_for(selector: &mut Selector, token: Token, interest: Interest) -> Interest {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Selected::Ready(t, ready) = selector.wait(Some(Duration::from_millis(50))).unwrap() {
            if t == token && ready.intersects(interest) {
                return ready;
            }
        }
    }
    panic!("no readiness for {:?}", token);
}

fn listener() -> TcpListener {
    TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap()
}

/// A connected (client, server) pair with a non-blocking client side
fn stream_pair() -> (TcpStream, StdTcpStream) {
    let std_listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(std_listener.local_addr().unwrap()).unwrap();
    let (server, _) = std_listener.accept().unwrap();
    (client, server)
}

// =============================================================================
// Timeout and Wake Tests
// =============================================================================

#[test]
fn test_wait_times_out_without_events() {
    let mut selector = Selector::new().unwrap();
    let start = Instant::now();
    assert_eq!(selector.wait(Some(Duration::from_millis(30))).unwrap(), Selected::TimedOut);
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn test_wake_from_another_thread() {
    let mut selector = Selector::new().unwrap();
    let handle = selector.wake_handle();

    let waker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.wake().unwrap();
    });

    assert_eq!(selector.wait(Some(Duration::from_secs(5))).unwrap(), Selected::Woken);
    waker.join().unwrap();
}

#[test]
fn test_wake_signals_coalesce() {
    let mut selector = Selector::new().unwrap();
    let handle = selector.wake_handle();
    handle.wake().unwrap();
    handle.wake().unwrap();
    handle.wake().unwrap();

    assert_eq!(selector.wait(Some(Duration::from_secs(1))).unwrap(), Selected::Woken);
    assert_eq!(selector.wait(Some(Duration::from_millis(30))).unwrap(), Selected::TimedOut);
}

// =============================================================================
// Registration Tests
// =============================================================================

#[test]
fn test_register_rejects_reserved_token_and_empty_interest() {
    let mut selector = Selector::new().unwrap();
    let mut listener = listener();

    assert!(selector.register(&mut listener, WAKE_TOKEN, Interest::ACCEPT).is_err());
    assert!(selector.register(&mut listener, LISTENER, Interest::NONE).is_err());
    assert_eq!(selector.interest(LISTENER), None);
}

#[test]
fn test_register_update_and_unregister() {
    let mut selector = Selector::new().unwrap();
    let (mut stream, _server) = stream_pair();

    selector.register(&mut stream, STREAM, Interest::READ).unwrap();
    selector.register(&mut stream, STREAM, Interest::READ).unwrap();
    assert_eq!(selector.interest(STREAM), Some(Interest::READ));

    selector
        .register(&mut stream, STREAM, Interest::READ | Interest::WRITE)
        .unwrap();
    assert_eq!(selector.interest(STREAM), Some(Interest::READ | Interest::WRITE));

    selector.unregister(&mut stream, STREAM).unwrap();
    assert_eq!(selector.interest(STREAM), None);
    // Unknown tokens are ignored
    selector.unregister(&mut stream, STREAM).unwrap();
}

// =============================================================================
// Readiness Tests
// =============================================================================

#[test]
fn test_accept_readiness() {
    let mut selector = Selector::new().unwrap();
    let mut listener = listener();
    let address = listener.local_addr().unwrap();
    selector.register(&mut listener, LISTENER, Interest::ACCEPT).unwrap();

    let _client = StdTcpStream::connect(address).unwrap();
    assert_eq!(wait_for(&mut selector, LISTENER, Interest::ACCEPT), Interest::ACCEPT);
    assert!(listener.accept().is_ok());
}

#[test]
fn test_connect_then_read_readiness() {
    let mut selector = Selector::new().unwrap();
    let std_listener = StdTcpListener::bind("127.0.0.1:0").unwrap();

    let mut stream = TcpStream::connect(std_listener.local_addr().unwrap()).unwrap();
    selector.register(&mut stream, STREAM, Interest::CONNECT).unwrap();
    let (mut server, _) = std_listener.accept().unwrap();

    assert_eq!(wait_for(&mut selector, STREAM, Interest::CONNECT), Interest::CONNECT);
    assert!(stream.peer_addr().is_ok());

    selector.register(&mut stream, STREAM, Interest::READ).unwrap();
    server.write_all(b"ping").unwrap();
    assert_eq!(wait_for(&mut selector, STREAM, Interest::READ), Interest::READ);
}

#[test]
fn test_write_readiness_on_idle_stream() {
    let mut selector = Selector::new().unwrap();
    let (mut stream, _server) = stream_pair();

    selector
        .register(&mut stream, STREAM, Interest::READ | Interest::WRITE)
        .unwrap();
    let ready = wait_for(&mut selector, STREAM, Interest::WRITE);
    assert!(ready.contains(Interest::WRITE));
    assert!(!ready.contains(Interest::READ));
}

#[test]
fn test_peer_hang_up_wakes_reader() {
    let mut selector = Selector::new().unwrap();
    let (mut stream, server) = stream_pair();

    selector.register(&mut stream, STREAM, Interest::READ).unwrap();
    drop(server);
    assert_eq!(wait_for(&mut selector, STREAM, Interest::READ), Interest::READ);
}

#[test]
fn test_wake_is_reported_before_readiness() {
    let mut selector = Selector::new().unwrap();
    let (mut stream, mut server) = stream_pair();
    selector.register(&mut stream, STREAM, Interest::READ).unwrap();

    server.write_all(b"data").unwrap();
    thread::sleep(Duration::from_millis(50));
    selector.wake_handle().wake().unwrap();

    assert_eq!(selector.wait(Some(Duration::from_secs(1))).unwrap(), Selected::Woken);
    assert_eq!(
        selector.wait(Some(Duration::from_secs(1))).unwrap(),
        Selected::Ready(STREAM, Interest::READ)
    );
}
